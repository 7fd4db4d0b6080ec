/// Purpose of a topic. Topic names are `<instrument><suffix>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicRole {
    Events,
    Histograms,
    RunInfo,
    DetSpecMap,
    SampleEnv,
    Choppers,
    Monitors,
}

impl TopicRole {
    pub const ALL: [TopicRole; 7] = [
        TopicRole::Events,
        TopicRole::Histograms,
        TopicRole::RunInfo,
        TopicRole::DetSpecMap,
        TopicRole::SampleEnv,
        TopicRole::Choppers,
        TopicRole::Monitors,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            TopicRole::Events => "_events",
            TopicRole::Histograms => "_eventSum",
            TopicRole::RunInfo => "_runInfo",
            TopicRole::DetSpecMap => "_detSpecMap",
            TopicRole::SampleEnv => "_sampleEnv",
            TopicRole::Choppers => "_choppers",
            TopicRole::Monitors => "_monitors",
        }
    }

    pub fn topic_name(self, instrument: &str) -> String {
        format!("{instrument}{}", self.suffix())
    }

    /// Inverse of [`TopicRole::topic_name`]: `("MARI", Events)` for `"MARI_events"`.
    pub fn parse(topic: &str) -> Option<(&str, TopicRole)> {
        TopicRole::ALL.iter().find_map(|role| {
            topic
                .strip_suffix(role.suffix())
                .filter(|instrument| !instrument.is_empty())
                .map(|instrument| (instrument, *role))
        })
    }
}
