//! Request-id catalog.
//!
//! Request ids identify the message kind of a frame, both for requests the
//! client issues and for notifications the server pushes unprompted.

use std::fmt;

/// Message kind carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub i32);

impl RequestId {
    /// Error message marker used by the server.
    pub const ERROR: RequestId = RequestId(-1);

    // Session
    pub const LOGIN: RequestId = RequestId(1001);
    pub const NO_QUEUE_HEART: RequestId = RequestId(1002);
    pub const GET_USER_SERVERLIST: RequestId = RequestId(1040);
    pub const CHANGE_SERVER: RequestId = RequestId(1041);

    // Buildings and army
    pub const GET_ORDER: RequestId = RequestId(2010);
    pub const BATCH_BUILD_ORDER: RequestId = RequestId(2032);
    pub const ARMY_CANCEL_PRODUCE_ALL: RequestId = RequestId(2045);

    // Rewards
    pub const VIDEO_REWARD_GET: RequestId = RequestId(3120);
    pub const SHARE_REWARD_BOX_RECEIVE: RequestId = RequestId(3135);

    // Alliance
    pub const ALLIANCE_GET_SCIENCE: RequestId = RequestId(4101);
    pub const ALLIANCE_DONATE_SCIENCE: RequestId = RequestId(4102);
    pub const GET_WORLD_SITE_DATA: RequestId = RequestId(4301);
    pub const WORLDSITE_DONATE: RequestId = RequestId(4305);

    // Activities
    pub const GET_ACTIVITY_DATA: RequestId = RequestId(5001);
    pub const START_EXPLORE_SEA: RequestId = RequestId(5210);
    pub const AWARD_EXPLORE_SEA: RequestId = RequestId(5211);

    // Server pushes
    pub const USER_DISCONNECT: RequestId = RequestId(9001);
    pub const PUSH_RESOURCE: RequestId = RequestId(9010);
    pub const BUILDING_INFO_LIST: RequestId = RequestId(9022);

    pub fn value(&self) -> i32 {
        self.0
    }

    /// Returns the catalog name, if the id is known.
    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            RequestId::ERROR => "ERROR",
            RequestId::LOGIN => "LOGIN",
            RequestId::NO_QUEUE_HEART => "NO_QUEUE_HEART",
            RequestId::GET_USER_SERVERLIST => "GET_USER_SERVERLIST",
            RequestId::CHANGE_SERVER => "CHANGE_SERVER",
            RequestId::GET_ORDER => "GET_ORDER",
            RequestId::BATCH_BUILD_ORDER => "BATCH_BUILD_ORDER",
            RequestId::ARMY_CANCEL_PRODUCE_ALL => "ARMY_CANCEL_PRODUCE_ALL",
            RequestId::VIDEO_REWARD_GET => "VIDEO_REWARD_GET",
            RequestId::SHARE_REWARD_BOX_RECEIVE => "SHARE_REWARD_BOX_RECEIVE",
            RequestId::ALLIANCE_GET_SCIENCE => "ALLIANCE_GET_SCIENCE",
            RequestId::ALLIANCE_DONATE_SCIENCE => "ALLIANCE_DONATE_SCIENCE",
            RequestId::GET_WORLD_SITE_DATA => "GET_WORLD_SITE_DATA",
            RequestId::WORLDSITE_DONATE => "WORLDSITE_DONATE",
            RequestId::GET_ACTIVITY_DATA => "GET_ACTIVITY_DATA",
            RequestId::START_EXPLORE_SEA => "START_EXPLORE_SEA",
            RequestId::AWARD_EXPLORE_SEA => "AWARD_EXPLORE_SEA",
            RequestId::USER_DISCONNECT => "USER_DISCONNECT",
            RequestId::PUSH_RESOURCE => "PUSH_RESOURCE",
            RequestId::BUILDING_INFO_LIST => "BUILDING_INFO_LIST",
            _ => return None,
        };
        Some(name)
    }
}

impl From<i32> for RequestId {
    fn from(value: i32) -> Self {
        RequestId(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "#{}", self.0),
        }
    }
}
