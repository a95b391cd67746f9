//! Small dense-vector helpers shared by the agent and the strategic response.

/// Dot product over the common prefix of `a` and `b`.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Logistic function that never evaluates `exp` of a large positive number.
pub fn sigmoid(logit: f64) -> f64 {
    if logit >= 0.0 {
        1.0 / (1.0 + (-logit).exp())
    } else {
        let z = logit.exp();
        z / (1.0 + z)
    }
}

pub fn clip(value: f64, bound: f64) -> f64 {
    value.clamp(-bound, bound)
}

pub fn clip_in_place(values: &mut [f64], bound: f64) {
    for v in values.iter_mut() {
        *v = clip(*v, bound);
    }
}
