/// Onset-strength envelope: one non-negative value per analysis frame.
///
/// Built through [`OnsetEnvelope::normalized`], the minimum is 0 and the
/// maximum 1, or every value is 0 when the envelope is constant.
#[derive(Clone, Debug, PartialEq)]
pub struct OnsetEnvelope {
    /// Strength per frame.
    pub values: Vec<f32>,
    /// Frames per second.
    pub frame_rate: f32,
}

impl OnsetEnvelope {
    /// Wrap raw values without touching them.
    #[must_use]
    pub fn new(values: Vec<f32>, frame_rate: f32) -> Self {
        Self { values, frame_rate }
    }

    /// Wrap raw flux values after mapping them onto `[0, 1]`.
    ///
    /// # Example
    /// ```
    /// use bg_core::envelope::OnsetEnvelope;
    /// let env = OnsetEnvelope::normalized(vec![2.0, 4.0, 3.0], 100.0);
    /// assert_eq!(env.values, vec![0.0, 1.0, 0.5]);
    /// ```
    #[must_use]
    pub fn normalized(mut values: Vec<f32>, frame_rate: f32) -> Self {
        normalize_unit_range(&mut values);
        Self { values, frame_rate }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Instant of frame `index`, in seconds.
    #[inline]
    #[must_use]
    pub fn frame_time(&self, index: usize) -> f64 {
        index as f64 / f64::from(self.frame_rate)
    }

    /// Length in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        self.frame_time(self.values.len())
    }
}

/// Shift so the minimum is 0, then scale so the maximum is 1.
///
/// Empty input is left alone. A constant sequence becomes all zeros: the range
/// is zero and no division happens.
///
/// # Example
/// ```
/// use bg_core::envelope::normalize_unit_range;
/// let mut flat = vec![0.7f32; 4];
/// normalize_unit_range(&mut flat);
/// assert!(flat.iter().all(|&v| v == 0.0));
/// ```
pub fn normalize_unit_range(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    for v in values.iter_mut() {
        *v -= min;
    }
    let max = values.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        for v in values.iter_mut() {
            *v /= max;
        }
    } else {
        log::debug!("normalize: plage nulle, enveloppe mise à zéro");
        values.fill(0.0);
    }
}
