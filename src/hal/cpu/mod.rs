//! Host kernels of the generic ops. Every kernel gathers its inputs before it writes,
//! so inputs may alias the output.

mod fill;
mod map;
mod reduce;
