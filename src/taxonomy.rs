//! Business-facing segment taxonomy
//!
//! Canonical ids are ordered by ascending mean spend, so a fixed table keyed
//! by id keeps its meaning across retrains: the highest id is always the
//! highest-spending segment.

use serde::Serialize;

/// Label, color and recommended action for one canonical segment
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SegmentProfile {
    pub label: &'static str,
    pub color: &'static str,
    pub description: &'static str,
    pub action: &'static str,
}

/// Fallback profile for segment ids beyond the reference configuration
pub const GENERIC: SegmentProfile = SegmentProfile {
    label: "Unmapped Segment",
    color: "gray",
    description: "Segment outside the reference taxonomy.",
    action: "Review this segment manually.",
};

const PROFILES: [SegmentProfile; 4] = [
    SegmentProfile {
        label: "At-Risk Customers",
        color: "red",
        description: "Haven't purchased in a long time. Churn risk.",
        action: "Reactivation discounts.",
    },
    SegmentProfile {
        label: "Promising Customers",
        color: "orange",
        description: "New or sporadic customers with high-value orders.",
        action: "Incentives for a second purchase.",
    },
    SegmentProfile {
        label: "Loyal Customers",
        color: "green",
        description: "Steady customers who respond well to promotions.",
        action: "Cross-selling and upselling.",
    },
    SegmentProfile {
        label: "VIP Customers",
        color: "blue",
        description: "Your best customers. They buy often and spend the most.",
        action: "Loyalty programme and perks.",
    },
];

/// Profile for a canonical segment id, if it is within the reference range
pub fn profile(segment: usize) -> Option<&'static SegmentProfile> {
    PROFILES.get(segment)
}

/// Profiles for the first `k` segments
pub fn profiles(k: usize) -> &'static [SegmentProfile] {
    &PROFILES[..k.min(PROFILES.len())]
}
