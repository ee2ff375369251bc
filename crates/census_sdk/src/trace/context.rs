use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 128-bit trace identifier. Zero is the invalid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TraceId(pub u128);

impl TraceId {
    pub const INVALID: TraceId = TraceId(0);

    /// Generates a random non-zero id.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        loop {
            let id: u128 = rng.gen();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Lower 64 bits, used by samplers that bucket on trace id.
    pub fn lower_u64(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// 64-bit span identifier. Zero is the invalid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpanId(pub u64);

impl SpanId {
    pub const INVALID: SpanId = SpanId(0);

    /// Generates a random non-zero id.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        loop {
            let id: u64 = rng.gen();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Trace-wide option bits. Bit 0 is the sampled flag; the rest are reserved
/// and carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TraceOptions(u8);

impl TraceOptions {
    const SAMPLED: u8 = 0x1;

    pub const DEFAULT: TraceOptions = TraceOptions(0);

    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub const fn as_byte(self) -> u8 {
        self.0
    }

    pub const fn is_sampled(self) -> bool {
        self.0 & Self::SAMPLED != 0
    }

    #[must_use]
    pub const fn with_sampled(self, sampled: bool) -> Self {
        if sampled {
            Self(self.0 | Self::SAMPLED)
        } else {
            Self(self.0 & !Self::SAMPLED)
        }
    }
}

/// Vendor-specific key/value pairs propagated with the trace, most recent first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Tracestate {
    entries: Vec<(String, String)>,
}

impl Tracestate {
    /// Maximum number of entries kept; older entries fall off the end.
    pub const MAX_ENTRIES: usize = 32;

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns a copy with `key` set to `value`, moved to the front.
    #[must_use]
    pub fn with_entry(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.push((key.clone(), value.into()));
        entries.extend(self.entries.iter().filter(|(k, _)| *k != key).cloned());
        entries.truncate(Self::MAX_ENTRIES);
        Self { entries }
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Identity of a span, propagated to children and across process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
    trace_options: TraceOptions,
    tracestate: Tracestate,
}

impl SpanContext {
    pub const INVALID: SpanContext = SpanContext {
        trace_id: TraceId::INVALID,
        span_id: SpanId::INVALID,
        trace_options: TraceOptions::DEFAULT,
        tracestate: Tracestate {
            entries: Vec::new(),
        },
    };

    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        trace_options: TraceOptions,
        tracestate: Tracestate,
    ) -> Self {
        Self {
            trace_id,
            span_id,
            trace_options,
            tracestate,
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn trace_options(&self) -> TraceOptions {
        self.trace_options
    }

    pub fn tracestate(&self) -> &Tracestate {
        &self.tracestate
    }

    pub fn is_sampled(&self) -> bool {
        self.trace_options.is_sampled()
    }

    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid() && self.span_id.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_ids_are_valid() {
        let mut rng = StdRng::seed_from_u64(1234);
        for _ in 0..100 {
            assert!(TraceId::random(&mut rng).is_valid());
            assert!(SpanId::random(&mut rng).is_valid());
        }
    }

    #[test]
    fn test_trace_options_sampled_bit() {
        let options = TraceOptions::from_byte(0b1010);
        assert!(!options.is_sampled());

        let sampled = options.with_sampled(true);
        assert!(sampled.is_sampled());
        // Reserved bits survive
        assert_eq!(sampled.as_byte(), 0b1011);
        assert_eq!(sampled.with_sampled(false).as_byte(), 0b1010);
    }

    #[test]
    fn test_tracestate_moves_updated_key_to_front() {
        let state = Tracestate::empty()
            .with_entry("a", "1")
            .with_entry("b", "2")
            .with_entry("a", "3");

        assert_eq!(
            state.entries(),
            &[("a".to_string(), "3".to_string()), ("b".to_string(), "2".to_string())]
        );
        assert_eq!(state.get("b"), Some("2"));
        assert_eq!(state.get("c"), None);
    }

    #[test]
    fn test_invalid_context() {
        assert!(!SpanContext::INVALID.is_valid());
        let ctx = SpanContext::new(
            TraceId(1),
            SpanId(2),
            TraceOptions::DEFAULT,
            Tracestate::empty(),
        );
        assert!(ctx.is_valid());
        assert_eq!(ctx.trace_id().to_string(), format!("{:032x}", 1));
        assert_eq!(ctx.span_id().to_string(), "0000000000000002");
    }
}
