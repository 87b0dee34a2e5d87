use std::ops;

/// Numerically stable `ln(e^a + e^b)`.
///
/// The smaller term is expressed relative to the larger one, so the
/// exponential never overflows, and terms that are negligible relative
/// to the larger one simply vanish.
#[inline]
pub fn log_add(a: f64, b: f64) -> f64 {
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    if lo == f64::NEG_INFINITY {
        // also covers the case where both are -inf, where
        // `lo - hi` would be NaN
        return hi;
    }
    hi + (lo - hi).exp().ln_1p()
}

/// Left-to-right reduction of `vals` with [log_add]; the log of the
/// summed probabilities, or zero probability for an empty slice.
pub(crate) fn log_sum(vals: &[LogSpace]) -> LogSpace {
    let mut acc = LogSpace::new_from_ln(f64::NEG_INFINITY);
    for v in vals {
        acc += *v;
    }
    acc
}

#[derive(PartialEq, PartialOrd, Clone, Copy, Debug)]
pub(crate) struct LogSpace {
    v: f64,
}

impl LogSpace {
    pub const fn new_from_ln(x: f64) -> Self {
        Self { v: x }
    }

    pub fn new_from_linear(x: f64) -> Self {
        Self { v: x.ln() }
    }

    pub fn get_linear(&self) -> f64 {
        self.v.exp()
    }

    pub fn get_ln(&self) -> f64 {
        self.v
    }
}

impl ops::Add<LogSpace> for LogSpace {
    type Output = LogSpace;

    fn add(self, rhs: LogSpace) -> Self::Output {
        LogSpace {
            v: log_add(self.v, rhs.v),
        }
    }
}

impl ops::AddAssign<LogSpace> for LogSpace {
    fn add_assign(&mut self, rhs: Self) {
        self.v = log_add(self.v, rhs.v);
    }
}

impl ops::Mul<LogSpace> for LogSpace {
    type Output = LogSpace;

    // because we are in log space * is +
    #[allow(clippy::suspicious_arithmetic_impl)]
    fn mul(self, rhs: LogSpace) -> Self::Output {
        LogSpace { v: self.v + rhs.v }
    }
}

impl ops::MulAssign<LogSpace> for LogSpace {
    // because we are in log space * is +
    #[allow(clippy::suspicious_op_assign_impl)]
    fn mul_assign(&mut self, rhs: Self) {
        self.v += rhs.v;
    }
}

impl ops::Div<LogSpace> for LogSpace {
    type Output = LogSpace;
    // because we are in log space / is -
    #[allow(clippy::suspicious_arithmetic_impl)]
    fn div(self, rhs: LogSpace) -> Self::Output {
        LogSpace { v: self.v - rhs.v }
    }
}
