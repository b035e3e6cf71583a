/// Pre-resolved reference to a model parameter.
///
/// Bindings are resolved once against the cube index when the fit is set
/// up, so the likelihood hot path never looks parameters up by name.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamRef {
    /// Free parameter at this position of the sample vector.
    Cube(usize),
    /// Parameter fixed to a constant value.
    Fixed(f64),
}

impl ParamRef {
    #[inline]
    pub fn value(&self, cube: &[f64]) -> f64 {
        match self {
            Self::Cube(index) => cube[*index],
            Self::Fixed(value) => *value,
        }
    }
}
