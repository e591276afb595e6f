//! Transpose automation sequence.
//!
//! A list of up to 16 `(semitones, duration, jump?, condition?)` steps
//! with a virtual playhead that advances on global-step boundaries.
//! Jumps make the playhead diverge from real time, so readers always ask
//! the playhead ("what is the current virtual step?") instead of mapping
//! time to position.

pub const MAX_TRANSPOSE_STEPS: usize = 16;
pub const MAX_TRANSPOSE_DURATION: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransposeStep {
    /// Semitone offset, -24..=+24.
    pub transpose: i8,
    /// Duration in global steps, 1..=256 once configured.
    pub duration: u16,
    /// Jump target on completion (-1 = none).
    pub jump: i8,
    /// Condition cycle length (0 = always passes).
    pub condition_n: i8,
    /// Which iteration of the cycle passes (1-based).
    pub condition_m: i8,
    pub condition_not: bool,
}

impl Default for TransposeStep {
    fn default() -> Self {
        Self {
            transpose: 0,
            duration: 0,
            jump: -1,
            condition_n: 0,
            condition_m: 0,
            condition_not: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransposeSequencer {
    steps: [TransposeStep; MAX_TRANSPOSE_STEPS],
    step_count: usize,
    total_steps: u32,
    /// Piecewise-constant transpose per global step, rebuilt lazily after
    /// edits; used by time-based readers and tests.
    lookup: Vec<i8>,
    lookup_valid: bool,
    pub enabled: bool,
    /// Manual offset used when no sequence is configured.
    pub manual: i8,
    /// Per-step evaluation counter for jump conditions.
    iteration: [u32; MAX_TRANSPOSE_STEPS],
    virtual_step: usize,
    entry_step: u32,
    first_call: bool,
}

impl Default for TransposeSequencer {
    fn default() -> Self {
        Self {
            steps: [TransposeStep::default(); MAX_TRANSPOSE_STEPS],
            step_count: 0,
            total_steps: 0,
            lookup: Vec::new(),
            lookup_valid: false,
            enabled: true,
            manual: 0,
            iteration: [0; MAX_TRANSPOSE_STEPS],
            virtual_step: 0,
            entry_step: 0,
            first_call: true,
        }
    }
}

impl TransposeSequencer {
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    pub fn current_virtual_step(&self) -> usize {
        self.virtual_step
    }

    pub fn step(&self, idx: usize) -> Option<&TransposeStep> {
        self.steps.get(idx)
    }

    pub fn iteration_count(&self, idx: usize) -> u32 {
        self.iteration[idx]
    }

    pub fn clear(&mut self) {
        *self = Self { enabled: self.enabled, manual: self.manual, ..Self::default() };
    }

    /// Rewind the playhead for a play start. The sequence itself is kept.
    pub fn reset_for_play(&mut self) {
        self.virtual_step = 0;
        self.entry_step = 0;
        self.iteration = [0; MAX_TRANSPOSE_STEPS];
        self.first_call = true;
    }

    pub fn set_step_count(&mut self, count: usize) -> bool {
        if count > MAX_TRANSPOSE_STEPS {
            return false;
        }
        self.step_count = count;
        self.rebuild_lookup();
        true
    }

    pub fn set_transpose(&mut self, idx: usize, semitones: i64) -> bool {
        if idx >= MAX_TRANSPOSE_STEPS || !(-24..=24).contains(&semitones) {
            return false;
        }
        self.steps[idx].transpose = semitones as i8;
        // Writing past the current end implicitly grows the sequence.
        if idx >= self.step_count {
            self.step_count = idx + 1;
        }
        self.rebuild_lookup();
        true
    }

    pub fn set_duration(&mut self, idx: usize, duration: i64) -> bool {
        if idx >= MAX_TRANSPOSE_STEPS || !(1..=MAX_TRANSPOSE_DURATION as i64).contains(&duration) {
            return false;
        }
        self.steps[idx].duration = duration as u16;
        self.rebuild_lookup();
        true
    }

    pub fn set_jump(&mut self, idx: usize, jump: i64) -> bool {
        if idx >= MAX_TRANSPOSE_STEPS || !(-1..MAX_TRANSPOSE_STEPS as i64).contains(&jump) {
            return false;
        }
        self.steps[idx].jump = jump as i8;
        true
    }

    pub fn set_condition_n(&mut self, idx: usize, n: i64) -> bool {
        if idx >= MAX_TRANSPOSE_STEPS || !(0..=127).contains(&n) {
            return false;
        }
        self.steps[idx].condition_n = n as i8;
        true
    }

    pub fn set_condition_m(&mut self, idx: usize, m: i64) -> bool {
        if idx >= MAX_TRANSPOSE_STEPS || !(0..=127).contains(&m) {
            return false;
        }
        self.steps[idx].condition_m = m as i8;
        true
    }

    pub fn set_condition_not(&mut self, idx: usize, not: bool) -> bool {
        if idx >= MAX_TRANSPOSE_STEPS {
            return false;
        }
        self.steps[idx].condition_not = not;
        true
    }

    /// Rebuild the lookup table: `total_steps = Σ duration`, one entry per
    /// global step holding that step's transpose.
    pub fn rebuild_lookup(&mut self) {
        self.total_steps =
            self.steps[..self.step_count].iter().map(|s| s.duration as u32).sum();

        if self.total_steps == 0 || self.step_count == 0 {
            self.lookup_valid = false;
            return;
        }

        self.lookup.clear();
        self.lookup.reserve(self.total_steps as usize);
        for s in &self.steps[..self.step_count] {
            for _ in 0..s.duration {
                self.lookup.push(s.transpose);
            }
        }
        self.lookup_valid = true;
    }

    pub fn lookup(&self) -> Option<&[i8]> {
        if self.lookup_valid {
            Some(&self.lookup)
        } else {
            None
        }
    }

    fn has_sequence(&self) -> bool {
        self.step_count > 0 && self.total_steps > 0
    }

    /// Condition check for a step's jump. The caller increments the
    /// iteration counter exactly once per evaluation, pass or fail, which
    /// keeps conditions stable across repeated visits.
    fn condition_passes(&self, idx: usize) -> bool {
        let step = &self.steps[idx];
        if step.condition_n <= 0 {
            return true;
        }
        let iteration = (self.iteration[idx] % step.condition_n as u32) + 1;
        let mut pass = iteration == step.condition_m as u32;
        if step.condition_not {
            pass = !pass;
        }
        pass
    }

    /// Advance the virtual playhead for a global-step boundary. Called
    /// once per boundary whether or not any track is triggering, so jumps
    /// execute on silent sequences too.
    pub fn on_step_boundary(&mut self, global_step: u32) {
        if !self.enabled || !self.has_sequence() {
            return;
        }

        if self.first_call {
            // Locate the virtual step for the current (possibly nonzero)
            // global position.
            let looped = global_step % self.total_steps;
            let mut accumulated = 0u32;
            self.virtual_step = 0;
            for (i, s) in self.steps[..self.step_count].iter().enumerate() {
                let next = accumulated + s.duration as u32;
                if looped < next {
                    self.virtual_step = i;
                    self.entry_step = global_step - (looped - accumulated);
                    break;
                }
                accumulated = next;
            }
            self.first_call = false;
            return;
        }

        let current = self.steps[self.virtual_step];
        let steps_in_current = global_step - self.entry_step;
        if steps_in_current < current.duration as u32 {
            return;
        }

        // Step finished; evaluate its jump before advancing.
        if current.jump >= 0 && (current.jump as usize) < self.step_count {
            let pass = self.condition_passes(self.virtual_step);
            self.iteration[self.virtual_step] += 1;
            if pass {
                log::trace!(
                    "transpose jump {} -> {}",
                    self.virtual_step,
                    current.jump
                );
                self.virtual_step = current.jump as usize;
                self.entry_step = global_step;
                return;
            }
        }

        self.virtual_step = (self.virtual_step + 1) % self.step_count;
        self.entry_step = global_step;
    }

    /// Transpose value of the current virtual step. Never advances the
    /// playhead.
    pub fn value_at_current_step(&self) -> i8 {
        if !self.enabled {
            return 0;
        }
        if !self.has_sequence() {
            return self.manual;
        }
        self.steps[self.virtual_step].transpose
    }

    /// Time-based step index for a global step (ignores jumps); -1 when
    /// no sequence exists.
    pub fn step_index_at(&self, global_step: u32) -> i32 {
        if !self.has_sequence() {
            return -1;
        }
        let looped = global_step % self.total_steps;
        let mut accumulated = 0u32;
        for (i, s) in self.steps[..self.step_count].iter().enumerate() {
            accumulated += s.duration as u32;
            if looped < accumulated {
                return i as i32;
            }
        }
        self.step_count as i32 - 1
    }
}
