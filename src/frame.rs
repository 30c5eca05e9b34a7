use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic time source the frame limiter waits on.
pub trait Clock {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`Instant`] and [`std::thread::sleep`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Simulated clock: sleeping advances time instantly. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Caps the frame rate and counts the frames actually produced.
#[derive(Debug)]
pub struct FrameLimiter<C: Clock = SystemClock> {
    clock: C,
    period: Duration,
    last_frame: Option<Duration>,
    frames: u64,
    window_start: Duration,
}

impl FrameLimiter<SystemClock> {
    pub fn new(target_fps: u32) -> Self {
        Self::with_clock(SystemClock::default(), target_fps)
    }
}

impl<C: Clock> FrameLimiter<C> {
    pub fn with_clock(clock: C, target_fps: u32) -> Self {
        let window_start = clock.now();
        let mut limiter = Self {
            clock,
            period: Duration::ZERO,
            last_frame: None,
            frames: 0,
            window_start,
        };
        limiter.set_target_fps(target_fps);
        limiter
    }

    /// Sets the frame cap. Zero disables throttling.
    pub fn set_target_fps(&mut self, fps: u32) {
        self.period = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / fps
        };
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits out the rest of the frame period, then starts a new frame.
    pub fn begin_frame(&mut self) {
        if let Some(last) = self.last_frame {
            let elapsed = self.clock.now().saturating_sub(last);
            if elapsed < self.period {
                self.clock.sleep(self.period - elapsed);
            }
        }
        self.frames += 1;
        self.last_frame = Some(self.clock.now());
    }

    /// Frames started since the last call; resets the counter.
    pub fn take_computed_frames(&mut self) -> u64 {
        self.window_start = self.clock.now();
        std::mem::take(&mut self.frames)
    }

    /// Returns the frame count once a full second has passed since the last report.
    pub fn poll_fps(&mut self) -> Option<u64> {
        let now = self.clock.now();
        if now.saturating_sub(self.window_start) >= FPS_WINDOW {
            Some(self.take_computed_frames())
        } else {
            None
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_spaced_by_the_period() {
        let clock = ManualClock::new();
        let mut limiter = FrameLimiter::with_clock(clock.clone(), 30);
        let mut starts = Vec::new();
        for _ in 0..5 {
            limiter.begin_frame();
            starts.push(clock.now());
            clock.advance(Duration::from_millis(5));
        }
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1) / 30);
        }
        assert_eq!(limiter.take_computed_frames(), 5);
        assert_eq!(limiter.take_computed_frames(), 0);
    }

    #[test]
    fn slow_frames_are_not_delayed() {
        let clock = ManualClock::new();
        let mut limiter = FrameLimiter::with_clock(clock.clone(), 60);
        limiter.begin_frame();
        clock.advance(Duration::from_millis(50));
        let before = clock.now();
        limiter.begin_frame();
        assert_eq!(clock.now(), before);
    }

    #[test]
    fn zero_fps_is_unthrottled() {
        let clock = ManualClock::new();
        let mut limiter = FrameLimiter::with_clock(clock.clone(), 0);
        limiter.begin_frame();
        limiter.begin_frame();
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn fps_reported_once_per_second() {
        let clock = ManualClock::new();
        let mut limiter = FrameLimiter::with_clock(clock.clone(), 10);
        for _ in 0..10 {
            limiter.begin_frame();
            assert!(limiter.poll_fps().is_none() || clock.now() >= FPS_WINDOW);
        }
        clock.advance(Duration::from_millis(100));
        assert_eq!(limiter.poll_fps(), Some(10));
        assert_eq!(limiter.poll_fps(), None);
    }
}
