//! Error types for the load balancer surface.

/// Errors surfaced by the load balancer.
///
/// The enumeration hot path is errorless: peers missing from the use-count
/// table count as 0 and unfiltered enumeration cannot fail. Only the
/// capability-filtered path has a failure mode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalancerError {
    /// The overlay refused the capability filter. The consumer sees no
    /// bins; retry with a known key.
    #[error("unknown capability key: {0}")]
    UnknownCapabilityKey(String),
}
