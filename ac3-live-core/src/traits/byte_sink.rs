use crate::models::error::StreamError;

/// Append-only byte sink.
///
/// Receives encoded frames in production order. The slice passed to
/// [`ByteSink::write`] is only valid for the duration of the call.
pub trait ByteSink: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError>;

    /// Push buffered bytes to their destination.
    fn flush(&mut self) -> Result<(), StreamError> {
        Ok(())
    }
}

impl ByteSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

impl<T: ByteSink + ?Sized> ByteSink for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        (**self).write(bytes)
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        (**self).flush()
    }
}

/// Forwards every write to several sinks, in order.
///
/// Stops at the first failing sink and returns its error.
#[derive(Default)]
pub struct TeeSink {
    sinks: Vec<Box<dyn ByteSink>>,
}

impl TeeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl ByteSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: Box<dyn ByteSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ByteSink for TeeSink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        for sink in &mut self.sinks {
            sink.write(bytes)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl ByteSink for SharedSink {
        fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
            self.0.lock().extend_from_slice(bytes);
            Ok(())
        }
    }

    #[test]
    fn vec_sink_appends() {
        let mut sink = Vec::new();
        sink.write(&[1, 2]).unwrap();
        sink.write(&[3]).unwrap();
        assert_eq!(sink, vec![1, 2, 3]);
    }

    #[test]
    fn tee_writes_to_every_sink() {
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(Vec::new()));
        let mut tee = TeeSink::new()
            .with(SharedSink(Arc::clone(&a)))
            .with(SharedSink(Arc::clone(&b)));

        tee.write(&[7, 8, 9]).unwrap();
        tee.flush().unwrap();

        assert_eq!(tee.len(), 2);
        assert_eq!(*a.lock(), vec![7, 8, 9]);
        assert_eq!(*b.lock(), vec![7, 8, 9]);
    }
}
