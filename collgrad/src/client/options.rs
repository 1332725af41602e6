use crate::types::ReduceOp;

/// Per-call parameters of a reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceOptions {
    /// Operation name used to match the call across ranks. Generated when
    /// absent.
    pub name: Option<String>,
    /// Requested op; `None` uses the client's configured default.
    pub op: Option<ReduceOp>,
    /// Multiplier applied to each input before the reduction.
    pub prescale: f64,
    /// Multiplier applied to the result after the reduction.
    pub postscale: f64,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            name: None,
            op: None,
            prescale: 1.0,
            postscale: 1.0,
        }
    }
}

impl ReduceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn op(mut self, op: ReduceOp) -> Self {
        self.op = Some(op);
        self
    }

    pub fn prescale(mut self, factor: f64) -> Self {
        self.prescale = factor;
        self
    }

    pub fn postscale(mut self, factor: f64) -> Self {
        self.postscale = factor;
        self
    }
}
