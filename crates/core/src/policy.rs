//! Watering decision.  Pure; the monitor loop gathers the inputs.

/// Decide whether a watering cycle should be requested now.
///
/// Rules, first match wins:
/// 1. pump already running → no
/// 2. safety budget exhausted → no
/// 3. override requested → yes
/// 4. otherwise water when the soil is drier than the threshold
pub fn should_water(
    moisture: i32,
    threshold: i32,
    override_requested: bool,
    watering: bool,
    water_remaining: bool,
) -> bool {
    if watering {
        return false;
    }
    if !water_remaining {
        return false;
    }
    if override_requested {
        return true;
    }
    moisture < threshold
}

// ===========================================================================
// Tests
// ===========================================================================
