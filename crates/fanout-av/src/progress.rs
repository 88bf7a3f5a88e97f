//! Parser for ffmpeg's `-progress` key=value stream.

/// Snapshot emitted at the end of each `progress=` block.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeProgress {
    /// 0.0..=1.0 of the expected output duration.
    pub fraction: f32,
    pub out_time_secs: f64,
    pub fps: Option<f64>,
    pub speed: Option<String>,
    /// `progress=end` was seen.
    pub finished: bool,
}

/// Accumulates `-progress pipe:2` lines.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    duration_secs: f64,
    out_time_us: Option<i64>,
    fps: Option<f64>,
    speed: Option<String>,
}

impl ProgressParser {
    /// `duration_secs` is the expected output duration used for the fraction.
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            out_time_us: None,
            fps: None,
            speed: None,
        }
    }

    /// Feed one line. Returns a snapshot when a block completes.
    pub fn feed(&mut self, line: &str) -> Option<EncodeProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        match key {
            // ffmpeg writes out_time_ms in microseconds too; prefer out_time_us.
            "out_time_us" => self.out_time_us = value.parse().ok(),
            "out_time_ms" if self.out_time_us.is_none() => self.out_time_us = value.parse().ok(),
            "fps" => self.fps = value.parse().ok(),
            "speed" if value != "N/A" => self.speed = Some(value.to_string()),
            "progress" => {
                let finished = value == "end";
                let out_time_secs = self.out_time_us.unwrap_or(0).max(0) as f64 / 1_000_000.0;
                let fraction = if finished {
                    1.0
                } else if self.duration_secs > 0.0 {
                    (out_time_secs / self.duration_secs).clamp(0.0, 1.0) as f32
                } else {
                    0.0
                };
                return Some(EncodeProgress {
                    fraction,
                    out_time_secs,
                    fps: self.fps,
                    speed: self.speed.clone(),
                    finished,
                });
            }
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut ProgressParser, text: &str) -> Vec<EncodeProgress> {
        text.lines().filter_map(|l| parser.feed(l)).collect()
    }

    #[test]
    fn block_yields_fraction() {
        let mut parser = ProgressParser::new(100.0);
        let snaps = feed_all(
            &mut parser,
            "frame=120\nfps=59.5\nout_time_us=25000000\nspeed=2.1x\nprogress=continue\n",
        );
        assert_eq!(snaps.len(), 1);
        assert!((snaps[0].fraction - 0.25).abs() < 1e-6);
        assert_eq!(snaps[0].fps, Some(59.5));
        assert_eq!(snaps[0].speed.as_deref(), Some("2.1x"));
        assert!(!snaps[0].finished);
    }

    #[test]
    fn end_block_is_complete() {
        let mut parser = ProgressParser::new(10.0);
        let snaps = feed_all(&mut parser, "out_time_us=9800000\nprogress=end\n");
        assert_eq!(snaps[0].fraction, 1.0);
        assert!(snaps[0].finished);
    }

    #[test]
    fn overshoot_is_clamped() {
        let mut parser = ProgressParser::new(10.0);
        let snaps = feed_all(&mut parser, "out_time_us=12000000\nprogress=continue\n");
        assert_eq!(snaps[0].fraction, 1.0);
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        let mut parser = ProgressParser::new(10.0);
        assert!(parser.feed("Input #0, mov,mp4 from 'a.mp4':").is_none());
        assert!(parser.feed("speed=N/A").is_none());
        assert!(parser.feed("out_time_us=N/A").is_none());
        let snap = parser.feed("progress=continue").unwrap();
        assert_eq!(snap.fraction, 0.0);
        assert!(snap.speed.is_none());
    }
}
