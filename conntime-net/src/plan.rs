/// Mantissas of the ramp, roughly five logarithmic steps per decade.
pub const SERIES: [f64; 5] = [1.0, 1.6, 2.5, 4.0, 6.3];

/// The `i`-th thread count of the ramp: `round(SERIES[i % 5] * 10^(i / 5))`.
pub fn term(i: usize) -> u64 {
    let decade = (i / SERIES.len()) as i32;
    (SERIES[i % SERIES.len()] * 10f64.powi(decade)).round() as u64
}

/// Thread counts of the ramp between a floor and a ceiling.
///
/// Terms below `floor` are skipped; iteration ends at the first term above
/// `ceiling`.
#[derive(Debug, Clone)]
pub struct BurstPlan {
    floor: u64,
    ceiling: u64,
    index: usize,
}

impl BurstPlan {
    pub fn new(floor: u64, ceiling: u64) -> BurstPlan {
        BurstPlan {
            floor,
            ceiling,
            index: 0,
        }
    }
}

impl Iterator for BurstPlan {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            let threads = term(self.index);
            if threads > self.ceiling || threads == u64::MAX {
                return None;
            }
            self.index += 1;
            if threads >= self.floor {
                return Some(threads);
            }
        }
    }
}
