/// Holds the last strictly positive overall and class positions.
///
/// The simulator reports 0 for a car's position while it refreshes its
/// standings buffer. Those readings are dropped so downstream consumers never
/// see a position regress to 0 once a valid one has been observed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PositionStabilizer {
    overall: i32,
    class: i32,
}

impl PositionStabilizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the raw readings of this tick and return the stabilized pair.
    pub fn update(&mut self, overall: Option<i32>, class: Option<i32>) -> (i32, i32) {
        if let Some(overall) = overall.filter(|p| *p > 0) {
            self.overall = overall;
        }
        if let Some(class) = class.filter(|p| *p > 0) {
            self.class = class;
        }
        self.current()
    }

    pub fn current(&self) -> (i32, i32) {
        (self.overall, self.class)
    }
}
