//! Congestion controller: estimates link throughput from queue-depth
//! history and resend ratios, meters outbound dispatch via a token
//! bucket.

use crate::config::CongestionConfig;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Per-session congestion state. Call [`tick`](Self::tick) roughly every
/// `packet_counter_average_interval`.
pub struct CongestionController {
    config: CongestionConfig,
    queue_history: VecDeque<u32>,
    sent_history: VecDeque<u32>,
    resent_history: VecDeque<u32>,
    last_event: Option<Instant>,
    last_tcp_sent: Option<Instant>,
    send_rate: f64,
    send_rate_requested: f64,
    packets_left: f64,
    packets_left_requested: f64,
    last_refill: Instant,
}

/// One tick's accounting inputs.
pub struct TickInput {
    /// Current send-queue depth (unacknowledged slots).
    pub queue_depth: u32,
    /// Packets sent since the last tick.
    pub sent_this_tick: u32,
    /// Packets resent since the last tick.
    pub resent_this_tick: u32,
    /// Current RTT estimate.
    pub rtt: Duration,
    /// Now.
    pub now: Instant,
}

impl CongestionController {
    /// Create a controller with the given configuration, starting at
    /// `packet_min_rate`.
    #[must_use]
    pub fn new(config: CongestionConfig, now: Instant) -> Self {
        let floor = config.packet_min_rate;
        Self {
            queue_history: VecDeque::with_capacity(config.queue_array_size),
            sent_history: VecDeque::with_capacity(config.last_sent_array_size),
            resent_history: VecDeque::with_capacity(config.last_sent_array_size),
            last_event: None,
            last_tcp_sent: None,
            send_rate: floor,
            send_rate_requested: floor,
            packets_left: f64::from(config.min_queue_length),
            packets_left_requested: f64::from(config.min_queue_length),
            last_refill: now,
            config,
        }
    }

    /// Record that a frame was just sent over TCP; suppresses
    /// rate-adjustment on the next tick so a cold UDP path isn't
    /// mistaken for loss.
    pub fn record_tcp_send(&mut self, now: Instant) {
        self.last_tcp_sent = Some(now);
    }

    /// Advance the congestion model by one accounting period.
    pub fn tick(&mut self, input: TickInput) {
        push_bounded(
            &mut self.queue_history,
            input.queue_depth,
            self.config.queue_array_size,
        );
        push_bounded(
            &mut self.sent_history,
            input.sent_this_tick,
            self.config.last_sent_array_size,
        );
        push_bounded(
            &mut self.resent_history,
            input.resent_this_tick,
            self.config.last_sent_array_size,
        );

        self.refill(input.now);

        let suppress_adjustment = self
            .last_tcp_sent
            .map(|t| input.now.duration_since(t) < self.config.event_timeout)
            .unwrap_or(false);
        if suppress_adjustment {
            return;
        }

        let interval_ms = self.config.packet_counter_average_interval.as_millis().max(1) as f64;
        let rtt_offset = (input.rtt.as_millis() as f64 / interval_ms).round() as usize;
        let window = self.sent_history.len();
        let offset = rtt_offset.min(window.saturating_sub(1));

        let total_sent: i64 = self
            .sent_history
            .iter()
            .skip(offset)
            .take(self.config.queue_array_size)
            .map(|&v| i64::from(v))
            .sum();
        let total_resent: i64 = self
            .resent_history
            .iter()
            .skip(offset)
            .take(self.config.queue_array_size)
            .map(|&v| i64::from(v))
            .sum();

        let delta_queue = delta_queue(&self.queue_history, self.config.queue_array_size);

        let (total_sent, total_resent) = if delta_queue > 0 {
            ((total_sent - i64::from(delta_queue)).max(0), total_resent)
        } else {
            (total_sent, total_resent.min(i64::from(-delta_queue)))
        };

        let n = self.config.queue_array_size.max(1) as f64;
        let interval_s = interval_ms / 1000.0;
        let min_speed = total_sent as f64 / (n * interval_s);
        let min_speed_request = (total_sent + total_resent) as f64 / (n * interval_s);

        let queue_depth = f64::from(input.queue_depth);
        let send_array_ratio = if min_speed > 0.0 {
            queue_depth / min_speed
        } else {
            0.0
        };

        let recent_event = self
            .last_event
            .map(|t| input.now.duration_since(t) <= Duration::from_secs(1))
            .unwrap_or(false);

        let new_rate = if send_array_ratio > 2.0 && input.queue_depth > self.config.min_queue_length
        {
            self.last_event = Some(input.now);
            min_speed * (2.0 / send_array_ratio)
        } else if !recent_event {
            min_speed * 1.2
        } else {
            min_speed * 0.9
        };

        self.send_rate = new_rate.max(self.config.packet_min_rate);
        self.send_rate_requested = (min_speed_request * 1.2).max(self.send_rate);
    }

    /// Current outbound send rate, packets/s.
    #[must_use]
    pub fn send_rate(&self) -> f64 {
        self.send_rate
    }

    /// Current retransmission rate, packets/s.
    #[must_use]
    pub fn send_rate_requested(&self) -> f64 {
        self.send_rate_requested
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        let ceiling = 4.0 * self.send_rate + f64::from(self.config.min_queue_length);
        self.packets_left = (self.packets_left + self.send_rate * elapsed).min(ceiling);

        let ceiling_req = 4.0 * self.send_rate_requested + f64::from(self.config.min_queue_length);
        self.packets_left_requested =
            (self.packets_left_requested + self.send_rate_requested * elapsed).min(ceiling_req);
    }

    /// Consume one token from the ordinary-send bucket. Returns `false`
    /// if none are available.
    pub fn try_consume(&mut self) -> bool {
        if self.packets_left >= 1.0 {
            self.packets_left -= 1.0;
            true
        } else {
            false
        }
    }

    /// Consume one token from the retransmission bucket.
    pub fn try_consume_retransmit(&mut self) -> bool {
        if self.packets_left_requested >= 1.0 {
            self.packets_left_requested -= 1.0;
            true
        } else {
            false
        }
    }
}

fn push_bounded(history: &mut VecDeque<u32>, value: u32, cap: usize) {
    if history.len() == cap {
        history.pop_front();
    }
    history.push_back(value);
}

fn delta_queue(history: &VecDeque<u32>, window: usize) -> i64 {
    if history.len() < window || window == 0 {
        return 0;
    }
    let now = i64::from(*history.back().unwrap());
    let then = i64::from(history[history.len() - window]);
    now - then
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_floor_rate() {
        let now = Instant::now();
        let controller = CongestionController::new(CongestionConfig::default(), now);
        assert_eq!(
            controller.send_rate(),
            CongestionConfig::default().packet_min_rate
        );
    }

    #[test]
    fn test_tcp_send_suppresses_adjustment() {
        let now = Instant::now();
        let mut controller = CongestionController::new(CongestionConfig::default(), now);
        controller.record_tcp_send(now);

        let before = controller.send_rate();
        controller.tick(TickInput {
            queue_depth: 1000,
            sent_this_tick: 500,
            resent_this_tick: 0,
            rtt: Duration::from_millis(50),
            now: now + Duration::from_millis(10),
        });
        assert_eq!(controller.send_rate(), before);
    }

    #[test]
    fn test_token_bucket_requires_elapsed_time_between_bursts() {
        // Testable property 6: at 100 pkt/s, bursting 100 then 100 more
        // requires >= 1s between bursts.
        let mut now = Instant::now();
        let mut config = CongestionConfig::default();
        config.min_queue_length = 0;
        let mut controller = CongestionController::new(config, now);
        controller.send_rate = 100.0;
        controller.packets_left = 100.0;

        let mut consumed_first = 0;
        for _ in 0..100 {
            if controller.try_consume() {
                consumed_first += 1;
            }
        }
        assert_eq!(consumed_first, 100);
        assert!(!controller.try_consume());

        now += Duration::from_millis(500);
        controller.refill(now);
        let mut consumed_mid = 0;
        for _ in 0..100 {
            if controller.try_consume() {
                consumed_mid += 1;
            }
        }
        assert!(consumed_mid < 100, "should not refill 100 tokens in under 1s");

        now += Duration::from_millis(500);
        controller.refill(now);
        let mut consumed_second = 0;
        for _ in 0..100 {
            if controller.try_consume() {
                consumed_second += 1;
            }
        }
        assert_eq!(consumed_mid + consumed_second, 100);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_token_bucket_burst_requires_full_second(
                burst_ms in 0u64..999,
            ) {
                let mut now = Instant::now();
                let mut config = CongestionConfig::default();
                config.min_queue_length = 0;
                let mut controller = CongestionController::new(config, now);
                controller.send_rate = 100.0;
                controller.packets_left = 100.0;

                for _ in 0..100 {
                    controller.try_consume();
                }

                now += Duration::from_millis(burst_ms);
                controller.refill(now);

                let mut consumed = 0;
                for _ in 0..100 {
                    if controller.try_consume() {
                        consumed += 1;
                    }
                }
                prop_assert!(consumed < 100);
            }
        }
    }
}
