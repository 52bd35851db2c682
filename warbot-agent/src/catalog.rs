//! Game catalog values used by the automation routines.
//!
//! Only the entries the routines need are listed here.

/// Keyed task id of the daily routine.
pub const DAILY_TASK_ID: i32 = 0;

/// Catalog id of the auto-collect machine building.
pub const AUTO_COLLECT_BUILDING_ID: i64 = 1801;

/// Group id passed when cancelling army production.
pub const ARMY_CANCEL_GROUP_ID: i64 = 1040;

/// Secret-treasure boxes claimable per day.
pub const SECRET_TREASURE_LIMIT: i64 = 5;

/// Gold video rewards claimable per day.
pub const DAILY_GOLD_VIDEO_LIMIT: i64 = 20;

/// Activity UI type of the deep-sea treasure event.
pub const DEEP_SEA_TREASURE_UI: &str = "ActivityDeepSeaTreasure";

/// Energy counters reported in the login reply.
pub mod energy {
    /// Remaining alliance science donations.
    pub const ALLIANCE_DONATE_NUM: i64 = 12;
    /// Remaining alliance science donations paid in coins, in units of ten.
    pub const ALLIANCE_DONATE_GOLD_NUM: i64 = 13;
    /// Remaining world-site donations.
    pub const ALLIANCE_WORLD_SITE_DONATE_NUM: i64 = 27;
}

/// Alliance sciences.
pub mod science {
    /// The science that accepts coin donations ("quick combat").
    pub const QUICK_COMBAT: i64 = 10011;

    /// Level cap used when a science entry does not report one.
    pub const DEFAULT_MAX_LEVEL: i64 = 20;

    /// Returns the level cap of `science_id`.
    pub fn max_level(science_id: i64) -> i64 {
        match science_id {
            QUICK_COMBAT => 50,
            _ => DEFAULT_MAX_LEVEL,
        }
    }
}

/// World sites (alliance wonders).
pub mod world_site {
    /// Sites granting items; these stop being worth donating to at level 4.
    pub const KIND_ITEM: i64 = 4;

    /// Level from which item sites rank last.
    pub const ITEM_SATURATION_LEVEL: i64 = 4;

    /// Maps a site id to its kind.
    pub fn kind(site_id: i64) -> i64 {
        site_id / 100
    }
}
