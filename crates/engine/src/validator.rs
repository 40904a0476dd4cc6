//! Timed multi-stage validation of detected signals
//!
//! The validator owns the in-flight pending sets and nothing else. Each
//! check pass returns effect records (stage updates, verdicts, synthesized
//! signals) that the worker persists, so the store stays the single
//! serving surface. Items leave the pending sets only once the worker
//! confirms the write, so a failed write is retried on the next pass.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::BotConfig;
use crate::types::{
    PendingPump, PendingSignal, PumpDumpKind, SignalStatus, StageResult, TradeDirection,
    STAGE_COUNT,
};

/// Slack around a stage deadline, in minutes. Poll cycles rarely land on
/// the exact second, so a stage fires once elapsed time is within this
/// margin of its target.
const STAGE_TOLERANCE_MINS: f64 = 0.1;

/// One stage resolved for a pending signal. Carries the full stage
/// array as of this update so the store can persist it verbatim.
#[derive(Debug, Clone)]
pub struct StageUpdate {
    pub signal_id: i64,
    pub stage: usize,
    pub result: StageResult,
    pub stages: [Option<StageResult>; STAGE_COUNT],
}

/// Terminal outcome for a signal after all stages resolve. Carries the
/// final stage array so the terminal write needs nothing else.
#[derive(Debug, Clone)]
pub struct SignalVerdict {
    pub signal_id: i64,
    pub status: SignalStatus,
    pub score: u32,
    pub stages: [Option<StageResult>; STAGE_COUNT],
}

/// A validated pump/dump strong enough to enter the trade queue directly
#[derive(Debug, Clone)]
pub struct SynthesizedSignal {
    pub symbol: String,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub score: u32,
}

/// Terminal outcome for a pump/dump's single timed check
#[derive(Debug, Clone)]
pub struct PumpVerdict {
    pub pump_id: i64,
    pub is_valid: bool,
    pub validation_price: f64,
    pub change_percent: f64,
    pub score: u32,
    pub synthesized: Option<SynthesizedSignal>,
}

#[derive(Debug, Default)]
pub struct ValidationOutput {
    pub stage_updates: Vec<StageUpdate>,
    pub verdicts: Vec<SignalVerdict>,
}

/// Tracks pending signals and pump/dump events through their timed checks
#[derive(Debug, Default)]
pub struct SignalValidator {
    pending_signals: HashMap<i64, PendingSignal>,
    pending_pumps: HashMap<i64, PendingPump>,
}

impl SignalValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_signal(&mut self, signal: PendingSignal) {
        self.pending_signals.insert(signal.id, signal);
    }

    pub fn register_pump(&mut self, pump: PendingPump) {
        self.pending_pumps.insert(pump.id, pump);
    }

    pub fn pending_signal_count(&self) -> usize {
        self.pending_signals.len()
    }

    pub fn pending_pump_count(&self) -> usize {
        self.pending_pumps.len()
    }

    /// Drop a signal whose verdict has been persisted
    pub fn resolve_signal(&mut self, signal_id: i64) {
        self.pending_signals.remove(&signal_id);
    }

    /// Drop a pump whose validation has been persisted
    pub fn resolve_pump(&mut self, pump_id: i64) {
        self.pending_pumps.remove(&pump_id);
    }

    /// Run due validation stages against the latest prices. Symbols with
    /// no price this cycle keep their stages unresolved until the next
    /// pass; a resolved stage is never re-evaluated. Fully resolved
    /// signals re-emit their verdict every pass until `resolve_signal`
    /// confirms the write.
    pub fn check_signals(
        &mut self,
        now: DateTime<Utc>,
        prices: &HashMap<String, f64>,
        cfg: &BotConfig,
    ) -> ValidationOutput {
        let mut out = ValidationOutput::default();

        for signal in self.pending_signals.values_mut() {
            if !signal.all_stages_resolved() {
                let Some(&price) = prices.get(signal.symbol.as_str()) else {
                    continue;
                };
                let elapsed_mins = (now - signal.created_at).num_seconds() as f64 / 60.0;

                for stage in 0..STAGE_COUNT {
                    if signal.stages[stage].is_some() {
                        continue;
                    }
                    if elapsed_mins < cfg.validation_times_mins[stage] - STAGE_TOLERANCE_MINS {
                        continue;
                    }
                    let change_percent = percent_change(signal.entry_price, price);
                    let result = StageResult {
                        price,
                        change_percent,
                        is_valid: direction_holds(signal.direction, change_percent, cfg.min_price_change),
                    };
                    signal.stages[stage] = Some(result);
                    out.stage_updates.push(StageUpdate {
                        signal_id: signal.id,
                        stage,
                        result,
                        stages: signal.stages,
                    });
                }
            }

            if signal.all_stages_resolved() {
                out.verdicts.push(verdict_for(signal, cfg));
            }
        }
        out
    }

    /// Run the single timed check for each due pump/dump event. Due
    /// pumps re-emit their verdict every pass until `resolve_pump`
    /// confirms the write.
    pub fn check_pumps(
        &self,
        now: DateTime<Utc>,
        prices: &HashMap<String, f64>,
        cfg: &BotConfig,
    ) -> Vec<PumpVerdict> {
        let mut verdicts = Vec::new();

        for pump in self.pending_pumps.values() {
            let Some(&price) = prices.get(pump.symbol.as_str()) else {
                continue;
            };
            let elapsed_mins = (now - pump.created_at).num_seconds() as f64 / 60.0;
            if elapsed_mins < cfg.pump_dump_time_mins - STAGE_TOLERANCE_MINS {
                continue;
            }

            let direction = match pump.kind {
                PumpDumpKind::Pump => TradeDirection::Long,
                PumpDumpKind::Dump => TradeDirection::Short,
            };
            let change_percent = percent_change(pump.entry_price, price);
            let is_valid = direction_holds(direction, change_percent, cfg.min_price_change);
            let score = if is_valid { cfg.pump_dump_weight } else { 0 };

            let synthesized = if is_valid && score >= cfg.min_score_for_trade {
                Some(SynthesizedSignal {
                    symbol: pump.symbol.clone(),
                    direction,
                    entry_price: price,
                    score,
                })
            } else {
                None
            };

            verdicts.push(PumpVerdict {
                pump_id: pump.id,
                is_valid,
                validation_price: price,
                change_percent,
                score,
                synthesized,
            });
        }
        verdicts
    }
}

fn percent_change(entry: f64, current: f64) -> f64 {
    if entry == 0.0 {
        return 0.0;
    }
    (current - entry) / entry * 100.0
}

/// Long wants the price up by at least the minimum move, short wants it
/// down by at least the minimum move
fn direction_holds(direction: TradeDirection, change_percent: f64, min_change: f64) -> bool {
    match direction {
        TradeDirection::Long => change_percent >= min_change,
        TradeDirection::Short => change_percent <= -min_change,
    }
}

/// Score the resolved stages and decide the final status.
/// Weights not summing to 100 are normalised at this point; validity
/// itself is a stage-count majority, independent of the score.
fn verdict_for(signal: &PendingSignal, cfg: &BotConfig) -> SignalVerdict {
    let mut score: u32 = 0;
    let mut total: u32 = 0;
    for (stage, weight) in cfg.validation_weights.iter().enumerate() {
        total += weight;
        if signal.stages[stage].map(|r| r.is_valid).unwrap_or(false) {
            score += weight;
        }
    }
    if total != 100 && total > 0 {
        score = ((score as f64 / total as f64) * 100.0) as u32;
    }
    score = score.min(100);

    let status = if signal.valid_stage_count() >= 2 {
        SignalStatus::Valid
    } else {
        SignalStatus::Invalid
    };
    SignalVerdict {
        signal_id: signal.id,
        status,
        score,
        stages: signal.stages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cfg() -> BotConfig {
        BotConfig::default()
    }

    fn prices_of(symbol: &str, price: f64) -> HashMap<String, f64> {
        HashMap::from([(symbol.to_string(), price)])
    }

    fn pending_long(id: i64, entry: f64, created_at: DateTime<Utc>) -> PendingSignal {
        PendingSignal::new(id, "BTC".to_string(), TradeDirection::Long, entry, created_at)
    }

    #[test]
    fn stage_waits_for_its_deadline() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_signal(pending_long(1, 100.0, now));

        let out = v.check_signals(now + Duration::seconds(30), &prices_of("BTC", 101.0), &cfg());
        assert!(out.stage_updates.is_empty());
        assert_eq!(v.pending_signal_count(), 1);
    }

    #[test]
    fn stage_fires_within_tolerance_of_deadline() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_signal(pending_long(1, 100.0, now));

        // 0.95 min elapsed, deadline 1.0 min, tolerance 0.1 min
        let out = v.check_signals(now + Duration::seconds(57), &prices_of("BTC", 101.0), &cfg());
        assert_eq!(out.stage_updates.len(), 1);
        assert_eq!(out.stage_updates[0].stage, 0);
        assert!(out.stage_updates[0].result.is_valid);
    }

    #[test]
    fn missing_price_defers_the_stage() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_signal(pending_long(1, 100.0, now));

        let out = v.check_signals(now + Duration::seconds(90), &HashMap::new(), &cfg());
        assert!(out.stage_updates.is_empty());

        // next cycle has the price and the late stage still resolves
        let out = v.check_signals(now + Duration::seconds(100), &prices_of("BTC", 101.0), &cfg());
        assert_eq!(out.stage_updates.len(), 1);
    }

    #[test]
    fn resolved_stage_is_never_overwritten() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_signal(pending_long(1, 100.0, now));

        let out = v.check_signals(now + Duration::seconds(61), &prices_of("BTC", 101.0), &cfg());
        assert_eq!(out.stage_updates.len(), 1);
        let out = v.check_signals(now + Duration::seconds(70), &prices_of("BTC", 50.0), &cfg());
        assert!(out.stage_updates.is_empty());
    }

    #[test]
    fn two_of_three_stages_make_a_valid_signal() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_signal(pending_long(1, 100.0, now));
        let c = cfg();

        v.check_signals(now + Duration::seconds(61), &prices_of("BTC", 101.0), &c);
        v.check_signals(now + Duration::seconds(121), &prices_of("BTC", 101.5), &c);
        let out = v.check_signals(now + Duration::seconds(241), &prices_of("BTC", 99.0), &c);

        assert_eq!(out.verdicts.len(), 1);
        let verdict = &out.verdicts[0];
        assert_eq!(verdict.status, SignalStatus::Valid);
        // stages 1 and 2 valid: 20 + 30
        assert_eq!(verdict.score, 50);
        assert!(verdict.stages.iter().all(|s| s.is_some()));

        // pending until the write is confirmed
        assert_eq!(v.pending_signal_count(), 1);
        v.resolve_signal(verdict.signal_id);
        assert_eq!(v.pending_signal_count(), 0);
    }

    #[test]
    fn verdict_repeats_until_the_write_is_confirmed() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_signal(pending_long(1, 100.0, now));
        let c = cfg();

        let out = v.check_signals(now + Duration::seconds(300), &prices_of("BTC", 101.0), &c);
        assert_eq!(out.verdicts.len(), 1);

        // unconfirmed, so the next pass emits the same verdict again,
        // even when the symbol has no price this cycle
        let out = v.check_signals(now + Duration::seconds(310), &HashMap::new(), &c);
        assert!(out.stage_updates.is_empty());
        assert_eq!(out.verdicts.len(), 1);
        assert_eq!(out.verdicts[0].score, 100);

        v.resolve_signal(1);
        let out = v.check_signals(now + Duration::seconds(320), &prices_of("BTC", 101.0), &c);
        assert!(out.verdicts.is_empty());
    }

    #[test]
    fn one_valid_stage_is_invalid_even_with_high_weight() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_signal(pending_long(1, 100.0, now));
        let c = cfg();

        v.check_signals(now + Duration::seconds(61), &prices_of("BTC", 99.0), &c);
        v.check_signals(now + Duration::seconds(121), &prices_of("BTC", 99.0), &c);
        let out = v.check_signals(now + Duration::seconds(241), &prices_of("BTC", 105.0), &c);

        let verdict = &out.verdicts[0];
        assert_eq!(verdict.status, SignalStatus::Invalid);
        assert_eq!(verdict.score, 50);
    }

    #[test]
    fn short_signal_wants_the_price_down() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_signal(PendingSignal::new(
            7,
            "ETH".to_string(),
            TradeDirection::Short,
            200.0,
            now,
        ));
        let c = cfg();

        v.check_signals(now + Duration::seconds(61), &prices_of("ETH", 198.0), &c);
        v.check_signals(now + Duration::seconds(121), &prices_of("ETH", 197.0), &c);
        let out = v.check_signals(now + Duration::seconds(241), &prices_of("ETH", 196.0), &c);

        assert_eq!(out.verdicts[0].status, SignalStatus::Valid);
        assert_eq!(out.verdicts[0].score, 100);
    }

    #[test]
    fn flat_price_fails_the_minimum_move() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_signal(pending_long(1, 100.0, now));
        // +0.05% is under the 0.1% minimum
        let out = v.check_signals(now + Duration::seconds(61), &prices_of("BTC", 100.05), &cfg());
        assert!(!out.stage_updates[0].result.is_valid);
    }

    #[test]
    fn score_normalised_when_weights_do_not_sum_to_100() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_signal(pending_long(1, 100.0, now));
        let mut c = cfg();
        c.validation_weights = [10, 10, 10];

        v.check_signals(now + Duration::seconds(61), &prices_of("BTC", 101.0), &c);
        v.check_signals(now + Duration::seconds(121), &prices_of("BTC", 101.0), &c);
        let out = v.check_signals(now + Duration::seconds(241), &prices_of("BTC", 99.0), &c);

        // 2 of 3 valid: 20 of a 30 total, normalised to 66
        assert_eq!(out.verdicts[0].score, 66);
    }

    #[test]
    fn normalisation_truncates_rather_than_rounds() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_signal(pending_long(1, 100.0, now));
        let mut c = cfg();
        c.validation_weights = [25, 25, 25];

        v.check_signals(now + Duration::seconds(61), &prices_of("BTC", 101.0), &c);
        v.check_signals(now + Duration::seconds(121), &prices_of("BTC", 99.0), &c);
        let out = v.check_signals(now + Duration::seconds(241), &prices_of("BTC", 99.0), &c);

        // 1 of 3 valid: 25 of a 75 total, truncated to 33
        assert_eq!(out.verdicts[0].score, 33);
        assert_eq!(out.verdicts[0].status, SignalStatus::Invalid);
    }

    #[test]
    fn late_catchup_resolves_multiple_stages_in_one_pass() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_signal(pending_long(1, 100.0, now));

        let out = v.check_signals(
            now + Duration::seconds(300),
            &prices_of("BTC", 101.0),
            &cfg(),
        );
        assert_eq!(out.stage_updates.len(), 3);
        assert_eq!(out.verdicts.len(), 1);
        assert_eq!(out.verdicts[0].status, SignalStatus::Valid);
        assert_eq!(out.verdicts[0].score, 100);
    }

    #[test]
    fn pump_validates_in_its_direction_and_synthesizes() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_pump(PendingPump {
            id: 3,
            symbol: "SOL".to_string(),
            kind: PumpDumpKind::Pump,
            entry_price: 10.0,
            created_at: now,
        });
        let c = cfg();

        let verdicts = v.check_pumps(now + Duration::seconds(61), &prices_of("SOL", 10.2), &c);
        assert_eq!(verdicts.len(), 1);
        let verdict = &verdicts[0];
        assert!(verdict.is_valid);
        assert_eq!(verdict.score, 80);
        let synth = verdict.synthesized.as_ref().unwrap();
        assert_eq!(synth.direction, TradeDirection::Long);
        assert_eq!(synth.entry_price, 10.2);
        assert_eq!(synth.score, 80);

        assert_eq!(v.pending_pump_count(), 1);
        v.resolve_pump(verdict.pump_id);
        assert_eq!(v.pending_pump_count(), 0);
    }

    #[test]
    fn pump_verdict_repeats_until_the_write_is_confirmed() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_pump(PendingPump {
            id: 3,
            symbol: "SOL".to_string(),
            kind: PumpDumpKind::Pump,
            entry_price: 10.0,
            created_at: now,
        });
        let c = cfg();

        let verdicts = v.check_pumps(now + Duration::seconds(61), &prices_of("SOL", 10.2), &c);
        assert_eq!(verdicts.len(), 1);

        // unconfirmed, so the check re-validates next pass
        let verdicts = v.check_pumps(now + Duration::seconds(63), &prices_of("SOL", 10.3), &c);
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].validation_price, 10.3);

        v.resolve_pump(3);
        assert!(v
            .check_pumps(now + Duration::seconds(65), &prices_of("SOL", 10.3), &c)
            .is_empty());
    }

    #[test]
    fn failed_pump_scores_zero_without_synthesis() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_pump(PendingPump {
            id: 3,
            symbol: "SOL".to_string(),
            kind: PumpDumpKind::Pump,
            entry_price: 10.0,
            created_at: now,
        });

        let verdicts = v.check_pumps(now + Duration::seconds(61), &prices_of("SOL", 9.5), &cfg());
        let verdict = &verdicts[0];
        assert!(!verdict.is_valid);
        assert_eq!(verdict.score, 0);
        assert!(verdict.synthesized.is_none());
    }

    #[test]
    fn weak_pump_weight_validates_without_synthesis() {
        let mut v = SignalValidator::new();
        let now = Utc::now();
        v.register_pump(PendingPump {
            id: 3,
            symbol: "SOL".to_string(),
            kind: PumpDumpKind::Dump,
            entry_price: 10.0,
            created_at: now,
        });
        let mut c = cfg();
        c.pump_dump_weight = 60; // below min_score_for_trade

        let verdicts = v.check_pumps(now + Duration::seconds(61), &prices_of("SOL", 9.8), &c);
        let verdict = &verdicts[0];
        assert!(verdict.is_valid);
        assert_eq!(verdict.score, 60);
        assert!(verdict.synthesized.is_none());
    }
}
