use json;
use rand::Rng;
use std::time::Instant;

/// Returns a string of random numbers of the requested length
pub fn random_number(size: usize) -> String {
    let mut rng = rand::thread_rng();
    let num: u64 = rng.gen_range(100_000_000_000..1_000_000_000_000);
    format!("{:0width$}", num, width = size)[0..size].to_string()
}

/// Converts a JSON number or string to an isize if possible
pub fn json_isize(value: &json::JsonValue) -> Option<isize> {
    if let Some(i) = value.as_isize() {
        return Some(i);
    } else if let Some(s) = value.as_str() {
        if let Ok(i2) = s.parse::<isize>() {
            return Some(i2);
        }
    };

    None
}

/// Converts a JSON number or string to an usize if possible
pub fn json_usize(value: &json::JsonValue) -> Option<usize> {
    if let Some(i) = value.as_usize() {
        return Some(i);
    } else if let Some(s) = value.as_str() {
        if let Ok(i2) = s.parse::<usize>() {
            return Some(i2);
        }
    };

    None
}

/// JSON-serialize a params array for the call log, replacing it with a
/// sentinel when the method name matches a configured redaction prefix.
pub fn stringify_params(method: &str, params: &json::JsonValue, protect: &[String]) -> String {
    if protect.iter().any(|p| method.starts_with(p.as_str())) {
        return "** PARAMS REDACTED **".to_string();
    }
    json::stringify(params.clone())
}

/// A countdown timer measured against wall-clock time.
///
/// `reset()` restarts the clock from now, giving the caller a fresh
/// `duration` seconds. `reset_once()` honors only the first call: it
/// resets the full clock the first time, then grants just one extra
/// second on every later call, so a chain of K refresh signals yields
/// an effective budget of `duration + duration` rather than
/// `duration * (K+1)`.
pub struct Timer {
    /// Duration of this timer in seconds.
    /// Timer is "done" once this many seconds have passed
    /// since start_time.
    duration: i32,

    /// Moment this timer starts.
    start_time: Instant,

    /// Set once `reset_once()` has performed its one full reset.
    refreshed: bool,
}

impl Timer {
    pub fn new(duration: i32) -> Timer {
        Timer {
            duration,
            start_time: Instant::now(),
            refreshed: false,
        }
    }

    pub fn reset(&mut self) {
        self.start_time = Instant::now();
    }

    /// Reset the clock in full on the first call; on every subsequent
    /// call, just grant one more second instead of a full refresh.
    pub fn reset_once(&mut self) {
        if self.refreshed {
            self.duration += 1;
        } else {
            self.reset();
            self.refreshed = true;
        }
    }

    pub fn remaining(&self) -> i32 {
        self.duration - self.start_time.elapsed().as_secs() as i32
    }

    pub fn done(&self) -> bool {
        self.remaining() <= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_matching_prefixes() {
        let protect = vec!["opensrf.auth.internal".to_string()];
        let params = json::array!["secret"];
        let s = stringify_params("opensrf.auth.internal.login", &params, &protect);
        assert_eq!(s, "** PARAMS REDACTED **");

        let s2 = stringify_params("opensrf.auth.login", &params, &protect);
        assert!(s2.contains("secret"));
    }

    #[test]
    fn timer_counts_down() {
        let t = Timer::new(5);
        assert!(!t.done());
        assert!(t.remaining() <= 5);
    }
}
