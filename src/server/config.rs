use std::sync::Arc;

pub(crate) const MAX_HEAD_BYTES: usize = 64 * 1024;
pub(crate) const RBUF_CAP: usize = 8 * 1024;

#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ServerCfg {
    max_head_bytes: usize,
    rbuf_capacity: usize,
}

impl ServerCfg {
    #[inline]
    pub fn builder() -> ServerCfgBuilder {
        ServerCfgBuilder::default()
    }

    /// Upper bound on an ICAP header block; a head that grows past it is
    /// answered with 400 instead of buffering without limit.
    #[inline]
    pub fn max_head_bytes(&self) -> usize {
        self.max_head_bytes
    }

    #[inline]
    pub fn rbuf_capacity(&self) -> usize {
        self.rbuf_capacity
    }
}

impl Default for ServerCfg {
    #[inline]
    fn default() -> Self {
        Self {
            max_head_bytes: MAX_HEAD_BYTES,
            rbuf_capacity: RBUF_CAP,
        }
    }
}

#[derive(Debug, Default)]
#[non_exhaustive]
pub struct ServerCfgBuilder {
    max_head_bytes: Option<usize>,
    rbuf_capacity: Option<usize>,
}

impl ServerCfgBuilder {
    pub fn max_head_bytes(mut self, n: usize) -> Self {
        self.max_head_bytes = Some(n.max(1));
        self
    }

    pub fn rbuf_capacity(mut self, n: usize) -> Self {
        self.rbuf_capacity = Some(n.max(512));
        self
    }

    pub fn build(self) -> Arc<ServerCfg> {
        Arc::new(ServerCfg {
            max_head_bytes: self.max_head_bytes.unwrap_or(MAX_HEAD_BYTES),
            rbuf_capacity: self.rbuf_capacity.unwrap_or(RBUF_CAP),
        })
    }
}
