use pmt_common::Real;

/// The trigger time tag counts in 31 bits, the top bit is reserved.
pub(crate) const TIME_TAG_MASK: u32 = 0x7FFF_FFFF;
pub(crate) const TIME_TAG_TICK_S: Real = 8e-9;
/// The span of one wrap of the time tag, about 17.18 s.
pub(crate) const TIME_TAG_RANGE_S: Real = (TIME_TAG_MASK as Real + 1.0) * TIME_TAG_TICK_S;

/// Reconstructs elapsed run time from the wrapping trigger time tag.
/// Events must be pushed in the order they were recorded.
#[derive(Default, Debug)]
pub(crate) struct ElapsedTime {
    wrap_count: u32,
    previous_s: Option<Real>,
    start_s: Option<Real>,
}

impl ElapsedTime {
    /// Returns the time of this event relative to the first event.
    pub(crate) fn next(&mut self, trigger_time_tag: u32) -> Real {
        let tag_s = Real::from(trigger_time_tag & TIME_TAG_MASK) * TIME_TAG_TICK_S;
        let mut time_s = tag_s + Real::from(self.wrap_count) * TIME_TAG_RANGE_S;
        if self.previous_s.is_some_and(|previous_s| time_s < previous_s) {
            self.wrap_count += 1;
            time_s += TIME_TAG_RANGE_S;
        }
        self.previous_s = Some(time_s);
        time_s - *self.start_s.get_or_insert(time_s)
    }

    pub(crate) fn wrap_count(&self) -> u32 {
        self.wrap_count
    }
}
