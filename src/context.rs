use crate::config::Config;
use crate::error::{Error, Result};
use crate::transport::{Backend, ContextOps, ContextParams};

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use tracing::debug;

/// Transport feature bit-set negotiated at context creation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Features(u64);

impl Features {
    pub const TAG: Features = Features(1 << 0);
    pub const RMA: Features = Features(1 << 1);
    pub const AMO32: Features = Features(1 << 2);
    pub const AMO64: Features = Features(1 << 3);
    pub const WAKEUP: Features = Features(1 << 4);
    pub const STREAM: Features = Features(1 << 5);
    pub const AM: Features = Features(1 << 6);

    const NAMES: [(Features, &'static str); 7] = [
        (Features::TAG, "TAG"),
        (Features::RMA, "RMA"),
        (Features::AMO32, "AMO32"),
        (Features::AMO64, "AMO64"),
        (Features::WAKEUP, "WAKEUP"),
        (Features::STREAM, "STREAM"),
        (Features::AM, "AM"),
    ];

    pub const fn empty() -> Self {
        Features(0)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Features) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Features {
    type Output = Features;

    fn bitor(self, rhs: Features) -> Features {
        Features(self.0 | rhs.0)
    }
}

impl BitOrAssign for Features {
    fn bitor_assign(&mut self, rhs: Features) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Features::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .peekable();

        if names.peek().is_none() {
            return f.write_str("(empty)");
        }

        let mut first = true;
        for name in names {
            if !first {
                f.write_str(" | ")?;
            }
            f.write_str(name)?;
            first = false;
        }

        Ok(())
    }
}

/// A transport context.
///
/// The context owns the backend's global state. Workers and memory
/// registrations keep it alive.
pub struct Context {
    ops: Arc<dyn ContextOps>,
    features: Features,
    mt_workers_shared: bool,
}

impl Context {
    /// Returns a builder with no feature enabled.
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// Features the context was created with.
    pub fn features(&self) -> Features {
        self.features
    }

    /// Whether workers may be shared between threads.
    pub fn is_multi_threaded(&self) -> bool {
        self.mt_workers_shared
    }

    /// Fails with [`Error::FeatureDisabled`] unless `required` is enabled.
    pub fn require(&self, required: Features) -> Result<()> {
        if self.features.contains(required) {
            Ok(())
        } else {
            Err(Error::FeatureDisabled(required))
        }
    }

    pub(crate) fn ops(&self) -> &dyn ContextOps {
        &*self.ops
    }
}

/// Builder for [`Context`].
///
/// # Examples
///
/// ```rust,ignore
/// let context = Context::builder()
///     .enable_tag()
///     .enable_wakeup()
///     .build(&Loopback::default())?;
/// ```
#[derive(Default)]
pub struct ContextBuilder {
    features: Features,
    print_config: bool,
    enable_mt: bool,
    config: Option<Config>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs the transport configuration when the context is built.
    pub fn enable_print_config(mut self) -> Self {
        self.print_config = true;
        self
    }

    /// Enables worker event descriptors for event-driven progress.
    pub fn enable_wakeup(mut self) -> Self {
        self.features |= Features::WAKEUP;
        self
    }

    pub fn enable_tag(mut self) -> Self {
        self.features |= Features::TAG;
        self
    }

    pub fn enable_stream(mut self) -> Self {
        self.features |= Features::STREAM;
        self
    }

    pub fn enable_am(mut self) -> Self {
        self.features |= Features::AM;
        self
    }

    pub fn enable_rma(mut self) -> Self {
        self.features |= Features::RMA;
        self
    }

    /// Enables remote atomics on 32-bit operands.
    pub fn enable_amo32(mut self) -> Self {
        self.features |= Features::AMO32;
        self
    }

    /// Enables remote atomics on 64-bit operands.
    pub fn enable_amo64(mut self) -> Self {
        self.features |= Features::AMO64;
        self
    }

    /// Allows workers to be shared between threads.
    pub fn enable_mt(mut self) -> Self {
        self.enable_mt = true;
        self
    }

    /// Uses `config` instead of reading `UCXIO_*` environment variables.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Creates the context through `backend`.
    pub fn build(self, backend: &dyn Backend) -> Result<Arc<Context>> {
        let config = self.config.unwrap_or_else(|| Config::from_env("UCXIO_"));

        if self.print_config {
            config.print();
        }

        let params = ContextParams {
            features: self.features,
            mt_workers_shared: self.enable_mt,
            config,
        };

        let ops = backend.create_context(&params)?;

        debug!(
            backend = backend.name(),
            features = ?self.features,
            mt = self.enable_mt,
            "context created"
        );

        Ok(Arc::new(Context {
            ops,
            features: self.features,
            mt_workers_shared: self.enable_mt,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::Features;

    #[test]
    fn test_features_contains_and_debug() {
        let features = Features::TAG | Features::WAKEUP;

        assert!(features.contains(Features::TAG));
        assert!(!features.contains(Features::RMA));
        assert!(features.contains(Features::empty()));
        assert_eq!(format!("{features:?}"), "TAG | WAKEUP");
        assert_eq!(format!("{:?}", Features::empty()), "(empty)");
    }
}
