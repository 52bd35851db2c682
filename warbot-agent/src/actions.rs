//! In-game automation routines.
//!
//! Every routine is a set of requests and scheduled tasks on the [`Agent`].
//! Replies come back through per-request callbacks, so a routine is a small
//! state machine spread over closures.

use crate::agent::Agent;
use crate::catalog::{self, energy, science, world_site};
use serde_json::{json, Value};
use std::time::Duration;
use warbot_protocol::{Document, RequestId, ValueExt};

/// Spacing between repeated donations.
const DONATION_SPACING: Duration = Duration::from_millis(100);

/// Delay between a building update and the next step of coin consumption.
const TRAINING_STEP_DELAY: Duration = Duration::from_millis(20);

/// Per-login counters and routine state.
#[derive(Debug, Clone, Default)]
pub struct ActionState {
    /// Building id of the auto-collect machine, if the account has one.
    pub auto_collect_machine_id: String,
    pub alliance_donate_num: i64,
    pub alliance_donate_gold_num: i64,
    pub world_site_donate_num: i64,
    pub coin_consumption: Option<CoinConsumption>,
}

/// An active coin-consumption run.
#[derive(Debug, Clone)]
pub struct CoinConsumption {
    /// Request body of the batch build order.
    pub batch_build: Document,
    /// Coin balance at which training stops.
    pub target: f64,
}

impl ActionState {
    /// Reads the building and energy counters from a login reply.
    pub fn from_login(user_info: &Document) -> Self {
        let mut state = Self::default();

        if let Some(building) = user_info
            .get("buildings")
            .items()
            .iter()
            .find(|b| b["buildingId"].int() == catalog::AUTO_COLLECT_BUILDING_ID)
        {
            state.auto_collect_machine_id = id_text(&building["id"]);
        }

        for item in user_info.get("energy").items() {
            let point = item["point"].int();
            match item["type"].int() {
                energy::ALLIANCE_DONATE_NUM => state.alliance_donate_num = point,
                energy::ALLIANCE_DONATE_GOLD_NUM => state.alliance_donate_gold_num = point,
                energy::ALLIANCE_WORLD_SITE_DONATE_NUM => state.world_site_donate_num = point,
                _ => {}
            }
        }

        state
    }
}

/// Slot actions for the deep-sea treasure activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeepSeaPlan {
    pub activity_id: i64,
    /// Idle slots to start.
    pub start: Vec<i64>,
    /// Finished slots to collect and restart.
    pub collect: Vec<i64>,
    /// Time until the earliest running slot finishes.
    pub recheck_in: Option<Duration>,
}

/// Plans the deep-sea treasure slots of `activity` at `server_time_ms`.
///
/// Slot end times are in seconds, zero for an idle slot.
pub fn plan_deep_sea(activity: &Value, server_time_ms: i64) -> DeepSeaPlan {
    let mut plan = DeepSeaPlan {
        activity_id: activity["id"].int(),
        ..DeepSeaPlan::default()
    };

    let mut next_end_ms: Option<i64> = None;
    for (index, slot) in activity["extra"]["slots"].items().iter().enumerate() {
        let index = index as i64;
        let end_ms = slot["et"].int().saturating_mul(1000);
        if end_ms == 0 {
            plan.start.push(index);
        } else if end_ms <= server_time_ms {
            plan.collect.push(index);
        } else {
            next_end_ms = Some(next_end_ms.map_or(end_ms, |t| t.min(end_ms)));
        }
    }

    plan.recheck_in =
        next_end_ms.map(|end| Duration::from_millis((end - server_time_ms).max(0) as u64));
    plan
}

/// Picks the world site to donate to.
///
/// Only sites contested by `alliance_id` qualify. The preferred kind ranks
/// first and saturated item sites last; ties go to the lower level, then to
/// the higher experience.
pub fn choose_world_site(resp: &Document, alliance_id: i64, preferred_kind: i64) -> Option<i64> {
    resp.get("worldWonders")
        .items()
        .iter()
        .filter(|site| site["activityAid"].int() == alliance_id)
        .map(|site| {
            let id = site["id"].int();
            let level = site["level"].int();
            let exp = site["exp"].int();
            let kind = world_site::kind(id);
            let rank = if kind == preferred_kind {
                0
            } else if kind == world_site::KIND_ITEM && level >= world_site::ITEM_SATURATION_LEVEL {
                i64::MAX
            } else {
                kind
            };
            (rank, level, std::cmp::Reverse(exp), id)
        })
        .min_by_key(|(rank, level, exp, _)| (*rank, *level, *exp))
        .map(|(_, _, _, id)| id)
}

/// Picks the alliance science to donate to.
///
/// The preferred science wins unless it is maxed or busy, then the
/// alliance's recommendation, then the last available science.
pub fn choose_science(resp: &Document, preferred: i64) -> Option<i64> {
    let mut preferred = preferred;
    let mut recommended = 0;
    let mut candidate = 0;

    for entry in resp.get("scs").items() {
        let id = entry["sid"].int();
        if entry["recommend"].flag() {
            recommended = id;
        }
        let max_level = match entry["maxLv"].int() {
            0 => science::max_level(id),
            lv => lv,
        };
        let unavailable = entry["lv"].int() >= max_level
            || entry["endTime"].int() != 0
            || entry["status"].int() != 0;
        if unavailable {
            if recommended == id {
                recommended = 0;
            }
            if preferred == id {
                preferred = 0;
            }
        } else {
            candidate = id;
        }
    }

    [preferred, recommended, candidate]
        .into_iter()
        .find(|id| *id != 0)
}

impl Agent {
    /// Runs the daily routine and re-arms it one run interval later.
    pub(crate) fn do_daily_tasks(&mut self) {
        let interval = self.config().schedule.run_interval();
        self.add_keyed_task(catalog::DAILY_TASK_ID, interval, |agent| {
            agent.do_daily_tasks()
        });

        self.check_activity();

        self.add_task(Duration::from_secs(1), |agent| {
            agent.execute_auto_collect_machine()
        });

        let claimed = self.user_info().get("secretTreasure").int();
        for i in claimed.max(0)..catalog::SECRET_TREASURE_LIMIT {
            let delay = Duration::from_secs(1) + DONATION_SPACING * i as u32;
            self.add_task(delay, |agent| agent.obtain_secret_treasure());
        }

        if self.user_info().get("dayGoldVideoCount").int() < catalog::DAILY_GOLD_VIDEO_LIMIT {
            self.add_task(Duration::from_secs(2), |agent| agent.obtain_video_reward());
            self.add_task(Duration::from_secs(32), |agent| agent.obtain_video_reward());
        }

        if self.alliance_id() != 0 {
            self.do_daily_alliance_tasks();
        }
    }

    fn do_daily_alliance_tasks(&mut self) {
        self.add_task(Duration::from_secs(3), |agent| {
            let world_id = agent.server_id();
            agent.request(
                RequestId::GET_WORLD_SITE_DATA,
                Document::from(json!({"worldId": world_id})),
                |agent, resp| {
                    let preferred = agent.config().preferences.world_site_donate_prefer;
                    if let Some(site_id) = choose_world_site(resp, agent.alliance_id(), preferred)
                    {
                        agent.donate_world_site(site_id);
                    }
                },
            );
        });

        self.add_task(Duration::from_secs(4), |agent| {
            agent.request(
                RequestId::ALLIANCE_GET_SCIENCE,
                Document::new(),
                |agent, resp| {
                    let preferred = agent.config().preferences.science_donate_prefer;
                    if let Some(science_id) = choose_science(resp, preferred) {
                        agent.donate_alliance_science(science_id);
                    }
                },
            );
        });

        if is_monday() && self.config().preferences.donate_coin_consume {
            self.add_task(Duration::from_secs(6), |agent| {
                agent.donate_alliance_science(science::QUICK_COMBAT)
            });
        }
    }

    fn donate_world_site(&mut self, site_id: i64) {
        for i in 0..self.actions.world_site_donate_num.max(0) {
            self.add_task(DONATION_SPACING * i as u32, move |agent| {
                agent.request(
                    RequestId::WORLDSITE_DONATE,
                    Document::from(json!({"id": site_id, "type": 1})),
                    move |agent, _| {
                        agent.progress(format!(
                            "donated to world site {} (kind {})",
                            site_id,
                            world_site::kind(site_id)
                        ));
                    },
                );
            });
        }
    }

    fn donate_alliance_science(&mut self, science_id: i64) {
        let (rounds, num) = if science_id == science::QUICK_COMBAT {
            (self.actions.alliance_donate_gold_num.max(0) / 10 + 1, 10)
        } else {
            (self.actions.alliance_donate_num.max(0), 1)
        };
        for i in 0..rounds {
            self.add_task(DONATION_SPACING * i as u32, move |agent| {
                agent.send_donate_science(science_id, num)
            });
        }
    }

    fn send_donate_science(&mut self, science_id: i64, num: i64) {
        self.request(
            RequestId::ALLIANCE_DONATE_SCIENCE,
            Document::from(json!({"scienceId": science_id, "type": 1, "num": num})),
            move |agent, _| {
                agent.progress(format!(
                    "donated to alliance science {} x{}",
                    science_id, num
                ));
            },
        );
    }

    /// Looks for activities with automatable parts.
    pub(crate) fn check_activity(&mut self) {
        self.request(
            RequestId::GET_ACTIVITY_DATA,
            Document::new(),
            |agent, resp| {
                for activity in resp.get("alist").items() {
                    if activity["showUiType"].text() == catalog::DEEP_SEA_TREASURE_UI {
                        agent.check_deep_sea_treasure(activity);
                    }
                }
            },
        );
    }

    fn check_deep_sea_treasure(&mut self, activity: &Value) {
        let plan = plan_deep_sea(activity, self.last_server_time_ms());
        for &slot in &plan.start {
            self.start_explore_sea(plan.activity_id, slot);
        }
        for &slot in &plan.collect {
            self.obtain_award_explore_sea(plan.activity_id, slot);
        }
        if let Some(delay) = plan.recheck_in {
            self.add_keyed_task(RequestId::AWARD_EXPLORE_SEA.value(), delay, |agent| {
                agent.check_activity()
            });
        }
    }

    fn start_explore_sea(&mut self, activity_id: i64, slot: i64) {
        self.request(
            RequestId::START_EXPLORE_SEA,
            Document::from(json!({"aid": activity_id, "index": slot})),
            move |agent, _| {
                agent.progress(format!("deep sea: slot {} exploring", slot + 1));
            },
        );
    }

    fn obtain_award_explore_sea(&mut self, activity_id: i64, slot: i64) {
        self.request(
            RequestId::AWARD_EXPLORE_SEA,
            Document::from(json!({"aid": activity_id, "index": slot})),
            move |agent, _| {
                agent.progress(format!("deep sea: slot {} collected", slot + 1));
                agent.start_explore_sea(activity_id, slot);
            },
        );
    }

    fn execute_auto_collect_machine(&mut self) {
        if self.actions.auto_collect_machine_id.is_empty() {
            return;
        }
        let id = self.actions.auto_collect_machine_id.clone();
        self.request(
            RequestId::GET_ORDER,
            Document::from(json!({"id": id})),
            |agent, resp| {
                let coin = resp.get("reward")["resource"]["coin"].float();
                agent.progress(format!("collected {} coins from the auto-collect machine", coin));
            },
        );
    }

    fn obtain_video_reward(&mut self) {
        self.request(
            RequestId::VIDEO_REWARD_GET,
            Document::from(json!({"type": 8, "param1": "1", "param2": ""})),
            |agent, resp| {
                let count = resp.get("dayGoldVideoCount").int();
                agent.set_user_info("dayGoldVideoCount", json!(count));
                let gold = resp.get("resource")["resource"]["gold"].int();
                agent.progress(format!(
                    "video reward: {} gold ({}/{} today)",
                    gold,
                    count,
                    catalog::DAILY_GOLD_VIDEO_LIMIT
                ));
            },
        );
    }

    fn obtain_secret_treasure(&mut self) {
        self.request(
            RequestId::SHARE_REWARD_BOX_RECEIVE,
            Document::new(),
            |agent, resp| {
                let count = resp.get("secretTreasure").int();
                agent.set_user_info("secretTreasure", json!(count));
                let reward = &resp.get("reward")["resource"];
                let gold = reward["gold"].int();
                let what = if gold != 0 {
                    format!("{} gold", gold)
                } else {
                    format!("{} coins", reward["coin"].float())
                };
                agent.progress(format!(
                    "secret treasure: {} ({}/{} today)",
                    what,
                    count,
                    catalog::SECRET_TREASURE_LIMIT
                ));
            },
        );
    }

    /// Starts training armies from `batch_build` until `coin` coins are spent.
    pub fn consume_coin(&mut self, batch_build: Document, coin: f64) {
        self.add_keyed_task(
            RequestId::BATCH_BUILD_ORDER.value(),
            Duration::ZERO,
            move |agent| agent.start_coin_consumption(batch_build, coin),
        );
    }

    fn start_coin_consumption(&mut self, batch_build: Document, coin: f64) {
        if self.actions.coin_consumption.is_some() {
            self.progress("coin consumption already running");
            return;
        }
        let current = self.user_info().get("resource")["coin"].float();
        self.actions.coin_consumption = Some(CoinConsumption {
            batch_build,
            target: current - coin,
        });
        self.send_batch_build();
    }

    fn send_batch_build(&mut self) {
        let coin = self.user_info().get("resource")["coin"].float();
        self.progress(format!("current coins: {}", coin));
        let next = match &self.actions.coin_consumption {
            Some(run) if coin > run.target => Some(run.batch_build.clone()),
            _ => None,
        };
        match next {
            Some(body) => self.send(RequestId::BATCH_BUILD_ORDER, body),
            None => {
                self.actions.coin_consumption = None;
                self.progress("training finished");
            }
        }
    }

    /// Standing handler for building pushes.
    pub(crate) fn on_building_update(&mut self, _data: &Document) {
        if self.actions.coin_consumption.is_some() {
            self.add_task(TRAINING_STEP_DELAY, |agent| {
                agent.send_delete_training_army()
            });
        }
    }

    fn send_delete_training_army(&mut self) {
        let cancel: Vec<Value> = self
            .army_buildings()
            .into_iter()
            .map(|(army, building)| {
                json!({
                    "armyid": army,
                    "buildingid": building,
                    "groupid": catalog::ARMY_CANCEL_GROUP_ID,
                })
            })
            .collect();
        self.request(
            RequestId::ARMY_CANCEL_PRODUCE_ALL,
            Document::from(json!({"cancel": cancel})),
            |agent, _| {
                if let Some(conn) = agent.conn.as_mut() {
                    conn.clear_army_buildings();
                }
                agent.add_task(TRAINING_STEP_DELAY, |agent| agent.send_batch_build());
            },
        );
    }
}

fn is_monday() -> bool {
    use chrono::Datelike;
    chrono::Local::now().weekday() == chrono::Weekday::Mon
}

fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}
