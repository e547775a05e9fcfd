//! Video-source catalog (ambient collaborator referenced by C4's `TlSr`
//! builder). A minimal static table, just enough to drive tally-by-source
//! for the default descriptor's product.

/// Numeric video-source identifiers exposed by the reference product,
/// in on-wire order.
pub const DEFAULT_SOURCES: [u16; 24] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 1000, 2001, 2002, 3010, 3011, 3020, 3021, 4010, 5010, 5020, 10010, 10011, 7001,
    7002, 8001,
];

/// Source list for a given product name. Unknown products fall back to
/// [`DEFAULT_SOURCES`] — the catalog of recognized products is an external
/// collaborator's concern, not this crate's.
#[must_use]
pub fn sources_for_product(_product: &str) -> &'static [u16] {
    &DEFAULT_SOURCES
}
