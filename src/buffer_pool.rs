use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Reusable read buffers for port-43 whois responses.
#[derive(Clone)]
pub struct BufferPool {
    buffers: Arc<Mutex<Vec<Vec<u8>>>>,
    buffer_size: usize,
    max_pooled: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            buffers: Arc::new(Mutex::new(Vec::with_capacity(max_pooled))),
            buffer_size,
            max_pooled,
        }
    }

    /// Take a zeroed buffer; it goes back to the pool when dropped.
    pub fn checkout(&self) -> PooledBuffer {
        let reused = match self.buffers.try_lock() {
            Ok(mut buffers) => buffers.pop(),
            // Lookups never block on the pool
            Err(_) => None,
        };

        let buffer = match reused {
            Some(mut buf) => {
                buf.clear();
                buf.resize(self.buffer_size, 0);
                buf
            }
            None => {
                debug!("Buffer pool empty, allocating {} bytes", self.buffer_size);
                vec![0; self.buffer_size]
            }
        };

        PooledBuffer {
            buffer,
            pool: self.clone(),
        }
    }

    #[cfg(test)]
    async fn pooled(&self) -> usize {
        self.buffers.lock().await.len()
    }
}

pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: BufferPool,
}

impl PooledBuffer {
    pub fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Ok(mut buffers) = self.pool.buffers.try_lock() {
            if buffers.len() < self.pool.max_pooled {
                buffers.push(std::mem::take(&mut self.buffer));
                return;
            }
        }
        debug!("Dropping whois buffer instead of pooling it");
    }
}
