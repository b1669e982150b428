/// The smallest value used to keep divisors away from zero.
pub const EPSILON: f64 = 1e-16;
