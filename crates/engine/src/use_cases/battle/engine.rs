//! Battle engine - turn state machine over the battle store.
//!
//! Every mutation of a live battle runs under that battle's slot lock, so two
//! actions (or an action and its timeout) can never both observe "my turn".
//! Storage writes happen before the turn flips; a failed write aborts the
//! action without a broadcast and puts the defender's hp back.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arena_domain::{
    Battle, BattleId, BattleSnapshot, Creature, DamageOutcome, DamageRoll, DomainError, EndReason,
    FighterSnapshot, RequestId, TurnSlot, User, UserId,
};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::infrastructure::ports::{BattleRepo, ClockPort, RandomPort, UserRepo};
use crate::infrastructure::timers::{TimerKey, TimerKind, TimerScheduler};

use super::error::BattleError;
use super::types::{BattleEndOutcome, BattleStats, TurnOutcome};

/// In-process state of one live battle.
#[derive(Debug, Default)]
struct BattleSlot {
    /// Request ids already applied (idempotency set)
    processed: HashSet<RequestId>,
    closed: bool,
}

/// A rejected attack, and whether the defender's damage is still stored.
struct AttackFailure {
    error: BattleError,
    damage_stored: bool,
}

impl AttackFailure {
    fn clean(error: BattleError) -> Self {
        Self {
            error,
            damage_stored: false,
        }
    }
}

pub struct BattleEngine {
    users: Arc<dyn UserRepo>,
    battles: Arc<dyn BattleRepo>,
    clock: Arc<dyn ClockPort>,
    random: Arc<dyn RandomPort>,
    timers: Arc<TimerScheduler>,
    slots: DashMap<BattleId, Arc<Mutex<BattleSlot>>>,
    action_timeout: Duration,
}

impl BattleEngine {
    pub fn new(
        users: Arc<dyn UserRepo>,
        battles: Arc<dyn BattleRepo>,
        clock: Arc<dyn ClockPort>,
        random: Arc<dyn RandomPort>,
        timers: Arc<TimerScheduler>,
        action_timeout: Duration,
    ) -> Self {
        Self {
            users,
            battles,
            clock,
            random,
            timers,
            slots: DashMap::new(),
            action_timeout,
        }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create an active battle between two users and arm its action timeout.
    ///
    /// The first turn owner is chosen uniformly at random. Both users are
    /// flagged in-battle; if that fails the battle is rolled back.
    pub async fn create_battle(
        &self,
        player1: &User,
        player2: &User,
    ) -> Result<Battle, BattleError> {
        let first_turn = if self.random.gen_range(0, 1) == 0 {
            TurnSlot::Player1
        } else {
            TurnSlot::Player2
        };
        let battle_id = BattleId::from_uuid(self.random.gen_uuid());
        let mut battle = Battle::new(
            battle_id,
            player1.id(),
            player2.id(),
            first_turn,
            self.clock.now(),
        )?;

        let first_name = match first_turn {
            TurnSlot::Player1 => player1.nickname(),
            TurnSlot::Player2 => player2.nickname(),
        };
        battle.append_log(format!(
            "Battle started: {} vs {}",
            player1.nickname(),
            player2.nickname()
        ));
        battle.append_log(format!("{} goes first!", first_name));
        battle.activate()?;

        self.battles.create(&battle).await?;

        if let Err(e) = self.flag_participants(&battle, true).await {
            tracing::warn!(battle_id = %battle_id, error = %e, "Rolling back battle creation");
            if let Err(rollback) = self.flag_participants(&battle, false).await {
                tracing::warn!(battle_id = %battle_id, error = %rollback, "Failed to reset in-battle flags");
            }
            if let Err(rollback) = self.battles.delete(battle_id).await {
                tracing::warn!(battle_id = %battle_id, error = %rollback, "Failed to delete rolled back battle");
            }
            return Err(e);
        }

        self.slots
            .insert(battle_id, Arc::new(Mutex::new(BattleSlot::default())));
        self.timers
            .arm(TimerKey::BattleAction(battle_id), self.action_timeout);

        tracing::info!(
            battle_id = %battle_id,
            player1_id = %player1.id(),
            player2_id = %player2.id(),
            first_turn_owner = %battle.current_turn_owner(),
            "Battle created"
        );

        Ok(battle)
    }

    /// Give the turn owner a full action window, e.g. once both clients are ready.
    pub fn restart_turn_clock(&self, battle_id: BattleId) -> bool {
        if !self.slots.contains_key(&battle_id) {
            return false;
        }
        self.timers
            .arm(TimerKey::BattleAction(battle_id), self.action_timeout);
        true
    }

    // =========================================================================
    // Turns
    // =========================================================================

    /// Apply one attack by `actor`.
    ///
    /// Returns `Ok(None)` for expected races that must not be broadcast: a
    /// repeated request id, a missing or finished battle, or an action out of
    /// turn. On a storage error the request id is released so the client may
    /// retry it, unless the defender's damage could not be undone.
    pub async fn process_action(
        &self,
        battle_id: BattleId,
        actor: UserId,
        request_id: RequestId,
    ) -> Result<Option<TurnOutcome>, BattleError> {
        let Some(slot) = self.slot(battle_id) else {
            tracing::debug!(battle_id = %battle_id, user_id = %actor, "Action for unknown battle ignored");
            return Ok(None);
        };
        let mut slot = slot.lock().await;

        if slot.closed {
            return Ok(None);
        }
        if slot.processed.contains(&request_id) {
            tracing::debug!(
                battle_id = %battle_id,
                request_id = %request_id,
                "Duplicate action ignored"
            );
            return Ok(None);
        }

        let Some(battle) = self.battles.get(battle_id).await? else {
            return Ok(None);
        };
        if !battle.is_active() {
            return Ok(None);
        }
        if battle.current_turn_owner() != actor {
            tracing::debug!(battle_id = %battle_id, user_id = %actor, "Action out of turn ignored");
            return Ok(None);
        }

        slot.processed.insert(request_id.clone());
        self.timers
            .arm(TimerKey::BattleAction(battle_id), self.action_timeout);

        match self.resolve_attack(&mut slot, battle, actor).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(failure) => {
                if !failure.damage_stored {
                    slot.processed.remove(&request_id);
                }
                tracing::warn!(
                    battle_id = %battle_id,
                    request_id = %request_id,
                    retryable = !failure.damage_stored,
                    error = %failure.error,
                    "Action aborted"
                );
                Err(failure.error)
            }
        }
    }

    async fn resolve_attack(
        &self,
        slot: &mut BattleSlot,
        battle: Battle,
        actor: UserId,
    ) -> Result<TurnOutcome, AttackFailure> {
        let defender_id = battle.opponent_of(actor).ok_or_else(|| {
            AttackFailure::clean(DomainError::constraint("attacker is not a participant").into())
        })?;
        let attacker = self.load_user(actor).await.map_err(AttackFailure::clean)?;
        let defender = self
            .load_user(defender_id)
            .await
            .map_err(AttackFailure::clean)?;

        let roll = DamageRoll::roll(|min, max| self.random.gen_range(min, max));

        let mut creature = defender.creature().clone();
        let hit = creature.apply_damage(roll.damage());
        self.users
            .upsert_creature(defender_id, &creature)
            .await
            .map_err(|e| AttackFailure::clean(e.into()))?;

        match self
            .record_hit(slot, battle, &attacker, &defender, &creature, hit, roll)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                // Put the defender's hp back so a retry cannot hit twice.
                let damage_stored = match self
                    .users
                    .upsert_creature(defender_id, defender.creature())
                    .await
                {
                    Ok(()) => false,
                    Err(restore) => {
                        tracing::error!(
                            user_id = %defender_id,
                            error = %restore,
                            "Failed to restore defender after aborted action"
                        );
                        true
                    }
                };
                Err(AttackFailure {
                    error,
                    damage_stored,
                })
            }
        }
    }

    /// Log the hit, then flip the turn or end the battle on a KO.
    async fn record_hit(
        &self,
        slot: &mut BattleSlot,
        mut battle: Battle,
        attacker: &User,
        defender: &User,
        creature: &Creature,
        hit: DamageOutcome,
        roll: DamageRoll,
    ) -> Result<TurnOutcome, BattleError> {
        let battle_id = battle.id();
        let actor = attacker.id();
        let defender_id = defender.id();
        let damage = roll.damage();

        let mut log_line = format!(
            "{} attacks {} for {} damage",
            attacker.nickname(),
            defender.nickname(),
            damage
        );
        if roll.is_crit() {
            log_line.push_str(" (Critical Hit!)");
        }
        self.battles.append_log(battle_id, &log_line).await?;
        battle.append_log(log_line.clone());

        let ended = match hit {
            DamageOutcome::Fainted => Some(
                self.end_locked(slot, &mut battle, actor, EndReason::Ko)
                    .await?,
            ),
            DamageOutcome::Wounded { .. } => {
                let mut advanced = battle.clone();
                advanced.advance_turn()?;
                self.battles
                    .patch(battle_id, advanced.turn_patch())
                    .await?;
                battle = advanced;
                None
            }
        };

        tracing::info!(
            battle_id = %battle_id,
            attacker_id = %actor,
            defender_id = %defender_id,
            damage,
            crit = roll.is_crit(),
            resulting_hp = creature.hp(),
            "Turn resolved"
        );

        Ok(TurnOutcome {
            battle_id,
            damage,
            crit: roll.is_crit(),
            resulting_hp: creature.hp(),
            log_line,
            acting_player: actor,
            next_player: defender_id,
            turn_count: battle.turn_count(),
            ended,
        })
    }

    // =========================================================================
    // Termination
    // =========================================================================

    /// The turn owner did not act in time: they lose.
    ///
    /// `generation` must still be the armed generation of the battle's action
    /// timer; a stale firing (an action re-armed it meanwhile) does nothing.
    /// If ending the battle fails, the timer is armed again.
    pub async fn handle_action_timeout(
        &self,
        battle_id: BattleId,
        generation: u64,
    ) -> Result<Option<BattleEndOutcome>, BattleError> {
        let key = TimerKey::BattleAction(battle_id);
        let Some(slot) = self.slot(battle_id) else {
            self.timers.claim(&key, generation);
            return Ok(None);
        };
        let mut slot = slot.lock().await;

        if !self.timers.claim(&key, generation) {
            tracing::debug!(battle_id = %battle_id, generation, "Stale action timeout ignored");
            return Ok(None);
        }
        if slot.closed {
            return Ok(None);
        }

        let result = self.end_afk(&mut slot, battle_id).await;
        if let Err(e) = &result {
            let generation = self.timers.arm(key, self.action_timeout);
            tracing::warn!(
                battle_id = %battle_id,
                generation,
                error = %e,
                "AFK loss not recorded, action timeout re-armed"
            );
        }
        result
    }

    async fn end_afk(
        &self,
        slot: &mut BattleSlot,
        battle_id: BattleId,
    ) -> Result<Option<BattleEndOutcome>, BattleError> {
        let Some(mut battle) = self.battles.get(battle_id).await? else {
            return Ok(None);
        };
        if !battle.is_active() {
            return Ok(None);
        }

        let afk = self.load_user(battle.current_turn_owner()).await?;
        let winner = battle
            .opponent_of(afk.id())
            .ok_or_else(|| DomainError::constraint("turn owner is not a participant"))?;
        let line = format!("{} timed out - AFK loss", afk.nickname());
        self.battles.append_log(battle_id, &line).await?;
        battle.append_log(line);

        tracing::info!(
            battle_id = %battle_id,
            afk_user = %afk.nickname(),
            "Turn owner timed out"
        );
        self.end_locked(slot, &mut battle, winner, EndReason::AfkTimeout)
            .await
            .map(Some)
    }

    /// End the user's live battle in the opponent's favour (disconnect).
    pub async fn forfeit(&self, user_id: UserId) -> Result<Option<BattleEndOutcome>, BattleError> {
        let Some(battle_id) = self.active_battle_id(user_id).await? else {
            return Ok(None);
        };
        self.end_with(battle_id, EndReason::Disconnect, |battle| {
            battle.opponent_of(user_id)
        })
        .await
    }

    /// End a battle whose ready handshake expired.
    ///
    /// The single ready player wins; with zero or two ready players, player 2
    /// is recorded as winner.
    pub async fn abort_setup(
        &self,
        battle_id: BattleId,
        ready: &[UserId],
    ) -> Result<Option<BattleEndOutcome>, BattleError> {
        self.end_with(battle_id, EndReason::SetupTimeout, |battle| match ready {
            [only] if battle.is_participant(*only) => Some(*only),
            _ => Some(battle.player2_id()),
        })
        .await
    }

    async fn end_with<F>(
        &self,
        battle_id: BattleId,
        reason: EndReason,
        pick_winner: F,
    ) -> Result<Option<BattleEndOutcome>, BattleError>
    where
        F: FnOnce(&Battle) -> Option<UserId>,
    {
        let Some(slot) = self.slot(battle_id) else {
            return Ok(None);
        };
        let mut slot = slot.lock().await;
        if slot.closed {
            return Ok(None);
        }
        let Some(mut battle) = self.battles.get(battle_id).await? else {
            return Ok(None);
        };
        if battle.is_ended() {
            return Ok(None);
        }
        let Some(winner) = pick_winner(&battle) else {
            return Ok(None);
        };
        self.end_locked(&mut slot, &mut battle, winner, reason)
            .await
            .map(Some)
    }

    /// Terminate a battle. Caller holds the slot lock and has checked the
    /// battle is not ended.
    ///
    /// Only reading the participants and storing the end can fail. Once the
    /// battle is ended in the store, the in-battle flags are cleared first and
    /// every later write is logged and skipped on failure.
    async fn end_locked(
        &self,
        slot: &mut BattleSlot,
        battle: &mut Battle,
        winner_id: UserId,
        reason: EndReason,
    ) -> Result<BattleEndOutcome, BattleError> {
        let battle_id = battle.id();
        let loser_id = battle
            .opponent_of(winner_id)
            .ok_or_else(|| DomainError::constraint("winner is not a participant"))?;

        let mut winner_creature = self.load_user(winner_id).await?.creature().clone();
        let mut loser_creature = self.load_user(loser_id).await?.creature().clone();

        battle.end(winner_id)?;
        self.battles.end_battle(battle_id, winner_id).await?;

        slot.closed = true;
        slot.processed.clear();
        self.slots.remove(&battle_id);
        self.timers.cancel(&TimerKey::BattleAction(battle_id));

        for user_id in [winner_id, loser_id] {
            if let Err(e) = self.users.set_in_battle(user_id, false).await {
                tracing::error!(
                    battle_id = %battle_id,
                    user_id = %user_id,
                    error = %e,
                    "Failed to clear in-battle flag"
                );
            }
        }

        winner_creature.level_up();
        loser_creature.faint();
        loser_creature.revive();
        let settled = [(winner_id, &winner_creature), (loser_id, &loser_creature)];
        for (user_id, creature) in settled {
            if let Err(e) = self.users.upsert_creature(user_id, creature).await {
                tracing::error!(
                    battle_id = %battle_id,
                    user_id = %user_id,
                    error = %e,
                    "Failed to store post-battle creature"
                );
            }
        }

        tracing::info!(
            battle_id = %battle_id,
            winner_id = %winner_id,
            loser_id = %loser_id,
            ?reason,
            winner_level = winner_creature.level(),
            "Battle ended"
        );

        Ok(BattleEndOutcome {
            battle_id,
            winner_id,
            loser_id,
            new_levels: vec![
                (winner_id, winner_creature.level()),
                (loser_id, loser_creature.level()),
            ],
            reason,
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The user's newest battle that has not ended.
    pub async fn active_battle_id(&self, user_id: UserId) -> Result<Option<BattleId>, BattleError> {
        let battles = self.battles.find_by_participant(user_id).await?;
        Ok(battles.iter().find(|b| !b.is_ended()).map(Battle::id))
    }

    /// Snapshot of the user's live battle, for reconnection.
    pub async fn find_active_battle_for(
        &self,
        user_id: UserId,
    ) -> Result<Option<BattleSnapshot>, BattleError> {
        match self.active_battle_id(user_id).await? {
            Some(battle_id) => self.snapshot(battle_id).await,
            None => Ok(None),
        }
    }

    pub async fn snapshot(&self, battle_id: BattleId) -> Result<Option<BattleSnapshot>, BattleError> {
        let Some(battle) = self.battles.get(battle_id).await? else {
            return Ok(None);
        };
        if battle.is_ended() {
            return Ok(None);
        }
        let player1 = self.load_user(battle.player1_id()).await?;
        let player2 = self.load_user(battle.player2_id()).await?;
        Ok(Some(BattleSnapshot {
            battle_id,
            player1: fighter(&player1),
            player2: fighter(&player2),
            current_turn_owner: battle.current_turn_owner(),
            turn_count: battle.turn_count(),
        }))
    }

    pub async fn stats(&self) -> Result<BattleStats, BattleError> {
        Ok(BattleStats {
            active_battles: self.battles.list_active().await?.len(),
            armed_timeouts: self.timers.armed_count(TimerKind::BattleAction),
            tracked_idempotency_sets: self.slots.len(),
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn slot(&self, battle_id: BattleId) -> Option<Arc<Mutex<BattleSlot>>> {
        self.slots.get(&battle_id).map(|entry| entry.value().clone())
    }

    async fn load_user(&self, user_id: UserId) -> Result<User, BattleError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(BattleError::UserNotFound(user_id))
    }

    async fn flag_participants(&self, battle: &Battle, in_battle: bool) -> Result<(), BattleError> {
        for user_id in battle.participants() {
            self.users.set_in_battle(user_id, in_battle).await?;
        }
        Ok(())
    }
}

fn fighter(user: &User) -> FighterSnapshot {
    let creature = user.creature();
    FighterSnapshot {
        user_id: user.id(),
        hp: creature.hp(),
        max_hp: creature.max_hp(),
        level: creature.level(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::{FixedClock, ScriptedRandom};
    use crate::infrastructure::memory::{InMemoryBattleRepo, InMemoryUserRepo};
    use crate::infrastructure::ports::{MockBattleRepo, MockUserRepo, RepoError};
    use crate::infrastructure::timers::TimerFired;
    use arena_domain::{BattleState, Creature, Nickname, MAX_LEVEL};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    const NO_CRIT: i32 = 100;
    const CRIT: i32 = 1;

    struct Harness {
        engine: BattleEngine,
        users: Arc<InMemoryUserRepo>,
        battles: Arc<InMemoryBattleRepo>,
        random: Arc<ScriptedRandom>,
        fired: mpsc::UnboundedReceiver<TimerFired>,
    }

    fn harness() -> Harness {
        let users = Arc::new(InMemoryUserRepo::new());
        let battles = Arc::new(InMemoryBattleRepo::new());
        let random = Arc::new(ScriptedRandom::new([]));
        let (timers, fired) = TimerScheduler::channel();
        let engine = BattleEngine::new(
            users.clone(),
            battles.clone(),
            Arc::new(FixedClock(Utc::now())),
            random.clone(),
            timers,
            Duration::from_secs(60),
        );
        Harness {
            engine,
            users,
            battles,
            random,
            fired,
        }
    }

    async fn seed(h: &Harness, name: &str) -> User {
        let user = User::new(Nickname::new(name).unwrap(), None, Utc::now());
        h.users.create(&user).await.unwrap();
        user
    }

    async fn user(h: &Harness, id: UserId) -> User {
        h.users.find_by_id(id).await.unwrap().unwrap()
    }

    fn req(id: &str) -> RequestId {
        RequestId::new(id).unwrap()
    }

    /// Battle between Ash and Gary with Ash (player 1) moving first.
    async fn started(h: &Harness) -> (Battle, User, User) {
        let ash = seed(h, "Ash").await;
        let gary = seed(h, "Gary").await;
        h.random.push([0]);
        let battle = h.engine.create_battle(&ash, &gary).await.unwrap();
        (battle, ash, gary)
    }

    #[tokio::test]
    async fn create_battle_is_active_with_opening_log() {
        let h = harness();
        let (battle, ash, gary) = started(&h).await;

        assert_eq!(battle.state(), BattleState::Active);
        assert_eq!(battle.current_turn_owner(), ash.id());
        assert_eq!(
            battle.log(),
            &[
                "Battle started: Ash vs Gary".to_string(),
                "Ash goes first!".to_string()
            ]
        );
        assert!(user(&h, ash.id()).await.is_in_battle());
        assert!(user(&h, gary.id()).await.is_in_battle());
        assert!(h
            .engine
            .timers
            .is_armed(&TimerKey::BattleAction(battle.id())));
    }

    #[tokio::test]
    async fn coin_flip_can_give_player2_the_first_turn() {
        let h = harness();
        let ash = seed(&h, "Ash").await;
        let gary = seed(&h, "Gary").await;
        h.random.push([1]);
        let battle = h.engine.create_battle(&ash, &gary).await.unwrap();

        assert_eq!(battle.current_turn_owner(), gary.id());
        assert_eq!(battle.log()[1], "Gary goes first!");
    }

    #[tokio::test]
    async fn turns_alternate_and_count_up() {
        let h = harness();
        let (battle, ash, gary) = started(&h).await;

        h.random.push([20, NO_CRIT]);
        let first = h
            .engine
            .process_action(battle.id(), ash.id(), req("a1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.damage, 20);
        assert!(!first.crit);
        assert_eq!(first.resulting_hp, 35);
        assert_eq!(first.acting_player, ash.id());
        assert_eq!(first.next_player, gary.id());
        assert_eq!(first.turn_count, 1);
        assert_eq!(first.log_line, "Ash attacks Gary for 20 damage");
        assert!(first.ended.is_none());

        // Ash cannot act twice in a row.
        h.random.push([20, NO_CRIT]);
        assert!(h
            .engine
            .process_action(battle.id(), ash.id(), req("a2"))
            .await
            .unwrap()
            .is_none());

        let second = h
            .engine
            .process_action(battle.id(), gary.id(), req("g1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.next_player, ash.id());
        assert_eq!(second.turn_count, 2);

        let stored = h.battles.get(battle.id()).await.unwrap().unwrap();
        assert_eq!(stored.current_turn_owner(), ash.id());
        assert_eq!(stored.turn_count(), 2);
        assert_eq!(stored.log().len(), 4);
    }

    #[tokio::test]
    async fn critical_hit_deals_one_and_a_half() {
        let h = harness();
        let (battle, ash, _) = started(&h).await;

        h.random.push([21, CRIT]);
        let turn = h
            .engine
            .process_action(battle.id(), ash.id(), req("a1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(turn.damage, 31);
        assert!(turn.crit);
        assert!(turn.log_line.ends_with(" (Critical Hit!)"));
    }

    #[tokio::test]
    async fn duplicate_request_id_is_a_no_op() {
        let h = harness();
        let (battle, ash, gary) = started(&h).await;

        h.random.push([20, NO_CRIT]);
        h.engine
            .process_action(battle.id(), ash.id(), req("same"))
            .await
            .unwrap()
            .unwrap();
        let before = h.battles.get(battle.id()).await.unwrap().unwrap();
        let hp_before = user(&h, gary.id()).await.creature().hp();

        h.random.push([20, NO_CRIT]);
        let again = h
            .engine
            .process_action(battle.id(), ash.id(), req("same"))
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(h.battles.get(battle.id()).await.unwrap().unwrap(), before);
        assert_eq!(user(&h, gary.id()).await.creature().hp(), hp_before);
    }

    #[tokio::test]
    async fn lethal_hit_ends_battle_and_settles_creatures() {
        let h = harness();
        let (battle, ash, gary) = started(&h).await;
        h.users
            .upsert_creature(gary.id(), &Creature::from_parts("Eevee", 15, 1, false))
            .await
            .unwrap();

        h.random.push([15, NO_CRIT]);
        let turn = h
            .engine
            .process_action(battle.id(), ash.id(), req("ko"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(turn.resulting_hp, 0);
        let ended = turn.ended.unwrap();
        assert_eq!(ended.winner_id, ash.id());
        assert_eq!(ended.loser_id, gary.id());
        assert_eq!(ended.reason, EndReason::Ko);
        assert_eq!(ended.new_levels, vec![(ash.id(), 2), (gary.id(), 1)]);

        let stored = h.battles.get(battle.id()).await.unwrap().unwrap();
        assert!(stored.is_ended());
        assert_eq!(stored.winner_id(), Some(ash.id()));

        let ash_after = user(&h, ash.id()).await;
        let gary_after = user(&h, gary.id()).await;
        assert_eq!(ash_after.creature().level(), 2);
        assert_eq!(ash_after.creature().max_hp(), 60);
        assert_eq!(gary_after.creature().hp(), 1);
        assert!(!gary_after.creature().is_fainted());
        assert!(!ash_after.is_in_battle());
        assert!(!gary_after.is_in_battle());

        assert!(!h
            .engine
            .timers
            .is_armed(&TimerKey::BattleAction(battle.id())));
        assert_eq!(h.engine.slots.len(), 0);

        // Nothing more happens in an ended battle.
        assert!(h
            .engine
            .process_action(battle.id(), gary.id(), req("late"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn winner_level_is_capped() {
        let h = harness();
        let (battle, ash, gary) = started(&h).await;
        h.users
            .upsert_creature(ash.id(), &Creature::from_parts("Mew", 150, MAX_LEVEL, false))
            .await
            .unwrap();
        h.users
            .upsert_creature(gary.id(), &Creature::from_parts("Eevee", 10, 1, false))
            .await
            .unwrap();

        h.random.push([10, NO_CRIT]);
        let turn = h
            .engine
            .process_action(battle.id(), ash.id(), req("ko"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(turn.ended.unwrap().new_levels[0], (ash.id(), MAX_LEVEL));
    }

    #[tokio::test(start_paused = true)]
    async fn afk_turn_owner_loses_even_when_disconnected() {
        let mut h = harness();
        let (battle, ash, gary) = started(&h).await;

        let fired = h.fired.recv().await.unwrap();
        assert_eq!(fired.key, TimerKey::BattleAction(battle.id()));

        let ended = h
            .engine
            .handle_action_timeout(battle.id(), fired.generation)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ended.winner_id, gary.id());
        assert_eq!(ended.loser_id, ash.id());
        assert_eq!(ended.reason, EndReason::AfkTimeout);

        let stored = h.battles.get(battle.id()).await.unwrap().unwrap();
        assert_eq!(
            stored.log().last().map(String::as_str),
            Some("Ash timed out - AFK loss")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timeout_after_action_is_ignored() {
        let h = harness();
        let (battle, ash, _) = started(&h).await;

        h.random.push([10, NO_CRIT]);
        h.engine
            .process_action(battle.id(), ash.id(), req("a1"))
            .await
            .unwrap()
            .unwrap();

        // Generation 1 was replaced when the action re-armed the timer.
        assert!(h
            .engine
            .handle_action_timeout(battle.id(), 1)
            .await
            .unwrap()
            .is_none());
        assert!(h.battles.get(battle.id()).await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn forfeit_awards_the_opponent() {
        let h = harness();
        let (battle, ash, gary) = started(&h).await;

        let ended = h.engine.forfeit(gary.id()).await.unwrap().unwrap();
        assert_eq!(ended.battle_id, battle.id());
        assert_eq!(ended.winner_id, ash.id());
        assert_eq!(ended.reason, EndReason::Disconnect);

        // Second forfeit finds nothing live.
        assert!(h.engine.forfeit(gary.id()).await.unwrap().is_none());
        assert!(h.engine.find_active_battle_for(ash.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn abort_setup_prefers_the_single_ready_player() {
        let h = harness();
        let (battle, ash, _) = started(&h).await;

        let ended = h
            .engine
            .abort_setup(battle.id(), &[ash.id()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ended.winner_id, ash.id());
        assert_eq!(ended.reason, EndReason::SetupTimeout);
    }

    #[tokio::test]
    async fn abort_setup_without_ready_players_records_player2() {
        let h = harness();
        let (battle, _, gary) = started(&h).await;

        let ended = h
            .engine
            .abort_setup(battle.id(), &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ended.winner_id, gary.id());
    }

    #[tokio::test]
    async fn snapshot_reflects_live_state() {
        let h = harness();
        let (battle, ash, gary) = started(&h).await;

        h.random.push([25, NO_CRIT]);
        h.engine
            .process_action(battle.id(), ash.id(), req("a1"))
            .await
            .unwrap();

        let snapshot = h
            .engine
            .find_active_battle_for(gary.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.battle_id, battle.id());
        assert_eq!(snapshot.player1.user_id, ash.id());
        assert_eq!(snapshot.player2.hp, 30);
        assert_eq!(snapshot.player2.max_hp, 55);
        assert_eq!(snapshot.current_turn_owner, gary.id());
        assert_eq!(snapshot.turn_count, 1);

        let stats = h.engine.stats().await.unwrap();
        assert_eq!(stats.active_battles, 1);
        assert_eq!(stats.armed_timeouts, 1);
        assert_eq!(stats.tracked_idempotency_sets, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_actions_by_the_turn_owner_resolve_once() {
        let h = harness();
        let (battle, ash, gary) = started(&h).await;
        h.random.push([20, NO_CRIT, 20, NO_CRIT]);

        let h = Arc::new(h);
        let attempts: Vec<_> = ["x1", "x2"]
            .into_iter()
            .map(|id| {
                let h = h.clone();
                let battle_id = battle.id();
                let ash_id = ash.id();
                tokio::spawn(async move {
                    h.engine.process_action(battle_id, ash_id, req(id)).await
                })
            })
            .collect();

        let mut accepted = 0;
        for attempt in attempts {
            if attempt.await.unwrap().unwrap().is_some() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);

        let stored = h.battles.get(battle.id()).await.unwrap().unwrap();
        assert_eq!(stored.turn_count(), 1);
        assert_eq!(stored.current_turn_owner(), gary.id());
        assert_eq!(user(&h, gary.id()).await.creature().hp(), 35);
    }

    // -------------------------------------------------------------------------
    // Storage failures
    // -------------------------------------------------------------------------

    fn active(p1: UserId, p2: UserId) -> Battle {
        let mut battle = Battle::new(BattleId::new(), p1, p2, TurnSlot::Player1, Utc::now()).unwrap();
        battle.activate().unwrap();
        battle
    }

    fn mocked_engine(users: MockUserRepo, battles: MockBattleRepo, rolls: Vec<i32>) -> BattleEngine {
        let (timers, _fired) = TimerScheduler::channel();
        BattleEngine::new(
            Arc::new(users),
            Arc::new(battles),
            Arc::new(FixedClock(Utc::now())),
            Arc::new(ScriptedRandom::new(rolls)),
            timers,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn failed_log_write_aborts_turn_and_releases_request_id() {
        let ash = User::new(Nickname::new("Ash").unwrap(), None, Utc::now());
        let gary = User::new(Nickname::new("Gary").unwrap(), None, Utc::now());
        let battle = active(ash.id(), gary.id());
        let battle_id = battle.id();

        let mut users = MockUserRepo::new();
        let (ash_c, gary_c) = (ash.clone(), gary.clone());
        users.expect_find_by_id().returning(move |id| {
            Ok([&ash_c, &gary_c].into_iter().find(|u| u.id() == id).cloned())
        });
        users.expect_upsert_creature().returning(|_, _| Ok(()));

        let mut battles = MockBattleRepo::new();
        let stored = battle.clone();
        battles
            .expect_get()
            .returning(move |_| Ok(Some(stored.clone())));
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        battles.expect_append_log().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RepoError::database("append_log", "disk full"))
            } else {
                Ok(())
            }
        });
        battles
            .expect_patch()
            .times(1)
            .withf(move |id, patch| *id == battle_id && patch.current_turn == TurnSlot::Player2)
            .returning(|_, _| Ok(()));

        let engine = mocked_engine(users, battles, vec![20, NO_CRIT, 20, NO_CRIT]);
        engine
            .slots
            .insert(battle_id, Arc::new(Mutex::new(BattleSlot::default())));

        let first = engine.process_action(battle_id, ash.id(), req("r1")).await;
        assert!(matches!(first, Err(BattleError::Repo(_))));

        let retry = engine
            .process_action(battle_id, ash.id(), req("r1"))
            .await
            .unwrap();
        assert!(retry.is_some());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_flagging_rolls_back_creation() {
        let ash = User::new(Nickname::new("Ash").unwrap(), None, Utc::now());
        let gary = User::new(Nickname::new("Gary").unwrap(), None, Utc::now());
        let gary_id = gary.id();

        let mut users = MockUserRepo::new();
        users.expect_set_in_battle().returning(move |id, flag| {
            if id == gary_id && flag {
                Err(RepoError::database("set_in_battle", "timeout"))
            } else {
                Ok(())
            }
        });

        let mut battles = MockBattleRepo::new();
        battles.expect_create().times(1).returning(|_| Ok(()));
        battles.expect_delete().times(1).returning(|_| Ok(()));

        let engine = mocked_engine(users, battles, vec![0]);
        let result = engine.create_battle(&ash, &gary).await;

        assert!(matches!(result, Err(BattleError::Repo(_))));
        assert!(engine.slots.is_empty());
    }

    fn users_of(ash: &User, gary: &User) -> MockUserRepo {
        let mut users = MockUserRepo::new();
        let (ash, gary) = (ash.clone(), gary.clone());
        users.expect_find_by_id().returning(move |id| {
            Ok([&ash, &gary].into_iter().find(|u| u.id() == id).cloned())
        });
        users
    }

    async fn hp_of(users: &InMemoryUserRepo, id: UserId) -> u32 {
        users.find_by_id(id).await.unwrap().unwrap().creature().hp()
    }

    fn stored_battle(battles: &mut MockBattleRepo, battle: &Battle) {
        let stored = battle.clone();
        battles
            .expect_get()
            .returning(move |_| Ok(Some(stored.clone())));
    }

    #[tokio::test]
    async fn aborted_action_restores_defender_before_retry() {
        let ash = User::new(Nickname::new("Ash").unwrap(), None, Utc::now());
        let gary = User::new(Nickname::new("Gary").unwrap(), None, Utc::now());
        let battle = active(ash.id(), gary.id());
        let battle_id = battle.id();

        let users = Arc::new(InMemoryUserRepo::new());
        users.create(&ash).await.unwrap();
        users.create(&gary).await.unwrap();

        let mut battles = MockBattleRepo::new();
        stored_battle(&mut battles, &battle);
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        battles.expect_append_log().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RepoError::database("append_log", "disk full"))
            } else {
                Ok(())
            }
        });
        battles.expect_patch().times(1).returning(|_, _| Ok(()));

        let (timers, _fired) = TimerScheduler::channel();
        let engine = BattleEngine::new(
            users.clone(),
            Arc::new(battles),
            Arc::new(FixedClock(Utc::now())),
            Arc::new(ScriptedRandom::new([20, NO_CRIT, 20, NO_CRIT])),
            timers,
            Duration::from_secs(60),
        );
        engine
            .slots
            .insert(battle_id, Arc::new(Mutex::new(BattleSlot::default())));

        assert!(engine
            .process_action(battle_id, ash.id(), req("r1"))
            .await
            .is_err());
        assert_eq!(hp_of(&users, gary.id()).await, 55);

        let retry = engine
            .process_action(battle_id, ash.id(), req("r1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retry.resulting_hp, 35);
        assert_eq!(hp_of(&users, gary.id()).await, 35);
    }

    #[tokio::test]
    async fn request_id_is_kept_when_damage_cannot_be_undone() {
        let ash = User::new(Nickname::new("Ash").unwrap(), None, Utc::now());
        let gary = User::new(Nickname::new("Gary").unwrap(), None, Utc::now());
        let battle = active(ash.id(), gary.id());
        let battle_id = battle.id();

        let mut users = users_of(&ash, &gary);
        let writes = Arc::new(AtomicUsize::new(0));
        let counter = writes.clone();
        users.expect_upsert_creature().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(())
            } else {
                Err(RepoError::database("upsert_creature", "offline"))
            }
        });

        let mut battles = MockBattleRepo::new();
        stored_battle(&mut battles, &battle);
        battles
            .expect_append_log()
            .times(1)
            .returning(|_, _| Err(RepoError::database("append_log", "offline")));

        let engine = mocked_engine(users, battles, vec![20, NO_CRIT, 20, NO_CRIT]);
        engine
            .slots
            .insert(battle_id, Arc::new(Mutex::new(BattleSlot::default())));

        assert!(engine
            .process_action(battle_id, ash.id(), req("r1"))
            .await
            .is_err());
        assert!(engine
            .process_action(battle_id, ash.id(), req("r1"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_afk_end_rearms_the_action_timeout() {
        let ash = User::new(Nickname::new("Ash").unwrap(), None, Utc::now());
        let gary = User::new(Nickname::new("Gary").unwrap(), None, Utc::now());
        let battle = active(ash.id(), gary.id());
        let battle_id = battle.id();
        let key = TimerKey::BattleAction(battle_id);

        let users = users_of(&ash, &gary);
        let mut battles = MockBattleRepo::new();
        stored_battle(&mut battles, &battle);
        battles
            .expect_append_log()
            .times(1)
            .returning(|_, _| Err(RepoError::database("append_log", "offline")));
        battles.expect_end_battle().never();

        let engine = mocked_engine(users, battles, vec![]);
        engine
            .slots
            .insert(battle_id, Arc::new(Mutex::new(BattleSlot::default())));
        let generation = engine.timers.arm(key, Duration::from_secs(60));

        let result = engine.handle_action_timeout(battle_id, generation).await;
        assert!(matches!(result, Err(BattleError::Repo(_))));
        assert!(engine.timers.is_armed(&key));
        assert_eq!(engine.slots.len(), 1);

        // The consumed generation stays stale.
        assert!(engine
            .handle_action_timeout(battle_id, generation)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn ended_battle_clears_flags_even_when_creature_writes_fail() {
        let ash = User::new(Nickname::new("Ash").unwrap(), None, Utc::now());
        let gary = User::new(Nickname::new("Gary").unwrap(), None, Utc::now());
        let (ash_id, gary_id) = (ash.id(), gary.id());
        let battle = active(ash_id, gary_id);
        let battle_id = battle.id();

        let mut users = users_of(&ash, &gary);
        users
            .expect_set_in_battle()
            .times(2)
            .withf(|_, in_battle| !*in_battle)
            .returning(move |id, _| {
                if id == ash_id {
                    Err(RepoError::database("set_in_battle", "offline"))
                } else {
                    Ok(())
                }
            });
        users
            .expect_upsert_creature()
            .times(2)
            .returning(|_, _| Err(RepoError::database("upsert_creature", "offline")));

        let mut battles = MockBattleRepo::new();
        stored_battle(&mut battles, &battle);
        battles
            .expect_end_battle()
            .times(1)
            .withf(move |id, winner| *id == battle_id && *winner == gary_id)
            .returning(|_, _| Ok(()));

        let engine = mocked_engine(users, battles, vec![]);
        engine
            .slots
            .insert(battle_id, Arc::new(Mutex::new(BattleSlot::default())));

        let ended = engine
            .abort_setup(battle_id, &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ended.reason, EndReason::SetupTimeout);
        assert_eq!(ended.loser_id, ash_id);
        assert!(engine.slots.is_empty());
    }
}
