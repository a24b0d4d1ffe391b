use serde::{Deserialize, Serialize};

/// One experimental treatment: which descriptive elements a round shows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ConditionFlags {
    pub use_adjectives: bool,
    pub use_preview: bool,
    pub show_ratings: bool,
}

impl ConditionFlags {
    #[must_use]
    pub const fn new(use_adjectives: bool, use_preview: bool, show_ratings: bool) -> Self {
        Self { use_adjectives, use_preview, show_ratings }
    }

    /// Full cartesian product of the three flags, `000` through `111`.
    #[must_use]
    pub fn all() -> Vec<Self> {
        let mut all = Vec::with_capacity(8);
        for use_adjectives in [false, true] {
            for use_preview in [false, true] {
                for show_ratings in [false, true] {
                    all.push(Self::new(use_adjectives, use_preview, show_ratings));
                }
            }
        }
        all
    }

    /// Stable three-digit id, e.g. `101` for adjectives + ratings.
    #[must_use]
    pub fn id(self) -> String {
        [self.use_adjectives, self.use_preview, self.show_ratings]
            .iter()
            .map(|flag| if *flag { '1' } else { '0' })
            .collect()
    }
}
