use std::thread::JoinHandle;

/// Spawns a named OS thread to serve a queue.
#[inline]
pub fn spawn_worker<F>(name: &str, f: F) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new().name(name.to_owned()).spawn(f)
}

/// Installs a `fmt` subscriber printing queue and op spans. Does nothing if one is installed.
#[cfg(feature = "trace")]
pub fn init_tracing() {
    use tracing_subscriber::fmt::format::FmtSpan;

    _ = tracing_subscriber::fmt()
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    #[test]
    fn test_spawn_worker() -> Result<(), Box<dyn Error>> {
        let handle = super::spawn_worker("worker", || {
            assert_eq!(std::thread::current().name(), Some("worker"));
        })?;
        assert!(handle.join().is_ok());
        Ok(())
    }

    #[cfg(feature = "trace")]
    #[test]
    fn test_init_tracing() {
        super::init_tracing();
        super::init_tracing();
        tracing::trace!("subscriber installed");
    }
}
