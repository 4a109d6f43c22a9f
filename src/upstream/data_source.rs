//! The transport contract the pipeline consumes, and an in-memory implementation.

use std::collections::HashMap;

use super::data_spec::{DataSpec, LENGTH_UNBOUNDED};
use crate::DashPlayerError;

/// A byte-range capable reader. Implementations wrap whatever transport delivers the bytes
/// (HTTP, local files, a test fixture); the pipeline only ever drives this interface.
///
/// The open/read/close cycle is sequential: `open` resolves the content length (or
/// [`LENGTH_UNBOUNDED`]), `read` returns `Ok(0)` at the end of the input, and `close` is
/// idempotent after end of input or an error.
pub trait DataSource: Send {
    fn open(&mut self, spec: &DataSpec) -> Result<i64, DashPlayerError>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DashPlayerError>;
    fn close(&mut self) -> Result<(), DashPlayerError>;
}

/// Creates a fresh [`DataSource`] per load. One loader owns one source at a time, but several
/// loaders run concurrently, so the factory is the unit of injection.
pub trait DataSourceFactory: Send + Sync {
    fn create(&self) -> Box<dyn DataSource>;
}

impl<F> DataSourceFactory for F
where
    F: Fn() -> Box<dyn DataSource> + Send + Sync,
{
    fn create(&self) -> Box<dyn DataSource> {
        self()
    }
}

/// A [`DataSource`] serving byte ranges out of in-memory resources keyed by URL. Used by the
/// test suites and by callers that have already fetched their media through other means.
#[derive(Debug, Clone, Default)]
pub struct BufferDataSource {
    resources: HashMap<String, Vec<u8>>,
    current: Option<(String, usize, usize)>,
}

impl BufferDataSource {
    pub fn new() -> BufferDataSource {
        BufferDataSource::default()
    }

    /// Registers the bytes served for the given absolute URL.
    pub fn insert(&mut self, url: impl Into<String>, data: Vec<u8>) {
        self.resources.insert(url.into(), data);
    }

    pub fn with_resource(url: impl Into<String>, data: Vec<u8>) -> BufferDataSource {
        let mut source = BufferDataSource::new();
        source.insert(url, data);
        source
    }
}

impl DataSource for BufferDataSource {
    fn open(&mut self, spec: &DataSpec) -> Result<i64, DashPlayerError> {
        let url = spec.uri.as_str().to_string();
        let resource = self
            .resources
            .get(&url)
            .ok_or_else(|| DashPlayerError::HttpStatus(404))?;
        let total = resource.len() as i64;
        if spec.position > total {
            return Err(DashPlayerError::HttpStatus(416));
        }
        let end = if spec.length == LENGTH_UNBOUNDED {
            total
        } else {
            let end = spec.position + spec.length;
            if end > total {
                return Err(DashPlayerError::ProtocolViolation(format!(
                    "range {}+{} exceeds resource length {total}",
                    spec.position, spec.length
                )));
            }
            end
        };
        self.current = Some((url, spec.position as usize, end as usize));
        Ok(end - spec.position)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DashPlayerError> {
        let (url, position, end) = self
            .current
            .as_mut()
            .ok_or_else(|| DashPlayerError::Other("read on unopened data source".to_string()))?;
        if position >= end {
            return Ok(0);
        }
        let resource = &self.resources[url.as_str()];
        let n = buf.len().min(*end - *position);
        buf[..n].copy_from_slice(&resource[*position..*position + n]);
        *position += n;
        Ok(n)
    }

    fn close(&mut self) -> Result<(), DashPlayerError> {
        self.current = None;
        Ok(())
    }
}
