//! Seed-count strategies for newly admitted peers.

/// How to seed the use count of a peer that just joined the overlay.
///
/// A newcomer has no history: starting it at zero would funnel every
/// request its way until it catches up with the incumbents. Both strategies
/// read current table and overlay state without holding the table lock; the
/// result is only a starting seed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InitStrategy {
    /// Adopt the count of the least-used incumbent in the newcomer's bin,
    /// or 0 when the bin is otherwise empty.
    #[default]
    LeastUsedInBin,
    /// Adopt the count of the connection closest to the newcomer's own
    /// address, or 0 when there is none.
    MostSimilarPeer,
}
