//! Tick scheduler
//!
//! A periodic timer interrupt calls [`TickScheduler::on_interrupt`], which
//! sets event bits in [`TickFlags`]. The main loop consumes each bit with
//! [`TickFlags::take`]. Flags are not queues: a bit raised while still pending
//! collapses into the pending occurrence and is only counted as an overrun.
//!
//! Within a cycle of `cycle_len` base ticks the counter runs `1..=cycle_len`:
//!
//! ```text
//! counter  1   2   3 ... j ... cycle_len
//! BASE     x   x   x     x     x
//! JITTER                 x                 j = offset + rand % range
//! CYCLE                        x           counter resets to 0
//! ```

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use rand_core::RngCore;

use crate::config::{TickConfig, TickConfigError};
use crate::error::ErrorStatus;

/// Logical tick events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TickEvent {
    /// Every interrupt; starts a conversion
    Base = 1 << 0,
    /// Once per cycle at a randomized position
    Jitter = 1 << 1,
    /// End of cycle; flushes the log
    Cycle = 1 << 2,
}

/// Event bits shared between the timer interrupt and the main loop
#[derive(Debug, Default)]
pub struct TickFlags {
    bits: AtomicU8,
    overruns: AtomicU32,
}

impl TickFlags {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU8::new(0),
            overruns: AtomicU32::new(0),
        }
    }

    /// Set an event bit (interrupt side)
    pub fn raise(&self, event: TickEvent) {
        let bit = event as u8;
        if self.bits.fetch_or(bit, Ordering::AcqRel) & bit != 0 {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Clear an event bit, returning whether it was pending (main loop side)
    pub fn take(&self, event: TickEvent) -> bool {
        let bit = event as u8;
        self.bits.fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }

    pub fn is_pending(&self, event: TickEvent) -> bool {
        self.bits.load(Ordering::Acquire) & event as u8 != 0
    }

    /// Occurrences lost because the bit was still pending
    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Marsaglia xorshift generator for the jitter position
///
/// Not cryptographic. A zero seed is replaced since zero is a fixed point.
#[derive(Debug, Clone)]
pub struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9 } else { seed },
        }
    }
}

impl RngCore for XorShift32 {
    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand_core::impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Interrupt-side tick state
///
/// Owned by the timer interrupt; shares only [`TickFlags`] with the main loop.
pub struct TickScheduler<R> {
    config: TickConfig,
    counter: u16,
    jitter_at: u16,
    jitter_armed: bool,
    blink: u16,
    rng: R,
}

impl<R: RngCore> TickScheduler<R> {
    pub fn new(config: TickConfig, rng: R) -> Result<Self, TickConfigError> {
        config.validate()?;
        let mut scheduler = Self {
            config,
            counter: 0,
            jitter_at: 0,
            jitter_armed: true,
            blink: 0,
            rng,
        };
        scheduler.jitter_at = scheduler.draw_jitter();
        Ok(scheduler)
    }

    fn draw_jitter(&mut self) -> u16 {
        let spread = self.rng.next_u32() % self.config.jitter_range as u32;
        self.config.jitter_offset + spread as u16
    }

    /// Advance one base tick
    ///
    /// Returns `true` when the fault indicator should toggle: every
    /// `blink_fast` ticks while any fault is set, every `blink_slow` otherwise.
    pub fn on_interrupt(&mut self, flags: &TickFlags, errors: &ErrorStatus) -> bool {
        self.counter += 1;
        flags.raise(TickEvent::Base);

        if self.jitter_armed && self.counter >= self.jitter_at {
            flags.raise(TickEvent::Jitter);
            self.jitter_armed = false;
        }

        if self.counter >= self.config.cycle_len {
            flags.raise(TickEvent::Cycle);
            self.counter = 0;
            self.jitter_at = self.draw_jitter();
            self.jitter_armed = true;
        }

        self.blink += 1;
        let divider = if errors.any() {
            self.config.blink_fast
        } else {
            self.config.blink_slow
        };
        if self.blink >= divider {
            self.blink = 0;
            true
        } else {
            false
        }
    }

    /// Position within the cycle, `0..cycle_len`
    pub fn counter(&self) -> u16 {
        self.counter
    }

    /// Counter value at which the next jitter tick fires
    pub fn jitter_position(&self) -> u16 {
        self.jitter_at
    }

    pub fn config(&self) -> &TickConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fault;

    fn scheduler() -> TickScheduler<XorShift32> {
        TickScheduler::new(TickConfig::default(), XorShift32::new(1)).unwrap()
    }

    #[test]
    fn test_flags_take_once() {
        let flags = TickFlags::new();
        flags.raise(TickEvent::Cycle);
        assert!(flags.is_pending(TickEvent::Cycle));
        assert!(!flags.is_pending(TickEvent::Base));
        assert!(flags.take(TickEvent::Cycle));
        assert!(!flags.take(TickEvent::Cycle));
    }

    #[test]
    fn test_pending_raise_collapses_and_counts_overrun() {
        let flags = TickFlags::new();
        flags.raise(TickEvent::Base);
        flags.raise(TickEvent::Base);
        assert_eq!(flags.overruns(), 1);
        assert!(flags.take(TickEvent::Base));
        assert!(!flags.take(TickEvent::Base));
    }

    #[test]
    fn test_event_counts_over_whole_cycles() {
        let mut scheduler = scheduler();
        let flags = TickFlags::new();
        let errors = ErrorStatus::new();
        let cycle_len = scheduler.config().cycle_len as usize;
        let cycles = 20;

        let (mut base, mut jitter, mut cycle) = (0, 0, 0);
        for _ in 0..cycles * cycle_len {
            scheduler.on_interrupt(&flags, &errors);
            base += flags.take(TickEvent::Base) as usize;
            jitter += flags.take(TickEvent::Jitter) as usize;
            cycle += flags.take(TickEvent::Cycle) as usize;
        }

        assert_eq!(base, cycles * cycle_len);
        assert_eq!(cycle, cycles);
        assert_eq!(jitter, cycles);
        assert_eq!(flags.overruns(), 0);
        assert_eq!(scheduler.counter(), 0);
    }

    #[test]
    fn test_jitter_position_stays_in_window_and_varies() {
        let mut scheduler = scheduler();
        let flags = TickFlags::new();
        let errors = ErrorStatus::new();
        let config = *scheduler.config();
        let window = config.jitter_offset..config.jitter_offset + config.jitter_range;

        let mut positions = [0u16; 16];
        for position in positions.iter_mut() {
            for tick in 1..=config.cycle_len {
                scheduler.on_interrupt(&flags, &errors);
                flags.take(TickEvent::Base);
                flags.take(TickEvent::Cycle);
                if flags.take(TickEvent::Jitter) {
                    *position = tick;
                }
            }
        }

        for position in positions {
            assert!(window.contains(&position), "jitter at {}", position);
        }
        assert!(positions.iter().any(|&p| p != positions[0]));
    }

    #[test]
    fn test_unconsumed_flags_collapse() {
        let mut scheduler = scheduler();
        let flags = TickFlags::new();
        let errors = ErrorStatus::new();

        for _ in 0..3 {
            scheduler.on_interrupt(&flags, &errors);
        }
        assert!(flags.take(TickEvent::Base));
        assert!(!flags.take(TickEvent::Base));
        assert_eq!(flags.overruns(), 2);
    }

    #[test]
    fn test_blink_rate_follows_error_status() {
        let mut scheduler = scheduler();
        let flags = TickFlags::new();
        let errors = ErrorStatus::new();

        let toggles = (0..100)
            .filter(|_| scheduler.on_interrupt(&flags, &errors))
            .count();
        assert_eq!(toggles, 100 / TickConfig::default().blink_slow as usize);

        errors.raise(Fault::Storage);
        let toggles = (0..100)
            .filter(|_| scheduler.on_interrupt(&flags, &errors))
            .count();
        assert_eq!(toggles, 100 / TickConfig::default().blink_fast as usize);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TickConfig {
            jitter_range: 0,
            ..TickConfig::default()
        };
        assert!(TickScheduler::new(config, XorShift32::new(1)).is_err());
    }

    #[test]
    fn test_xorshift_zero_seed_is_not_stuck() {
        let mut rng = XorShift32::new(0);
        let a = rng.next_u32();
        let b = rng.next_u32();
        assert_ne!(a, 0);
        assert_ne!(a, b);

        let mut buf = [0u8; 5];
        rng.fill_bytes(&mut buf);
        assert!(buf.iter().any(|&b| b != 0));
    }
}
