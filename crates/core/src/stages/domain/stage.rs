use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// GMM-HMM model generation, each one seeded by the previous one's alignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Generation {
    Mono,
    Tri,
    Lda,
}

impl Generation {
    pub const ALL: [Generation; 3] = [Generation::Mono, Generation::Tri, Generation::Lda];

    pub fn name(self) -> &'static str {
        match self {
            Self::Mono => "mono",
            Self::Tri => "tri",
            Self::Lda => "lda",
        }
    }

    /// The generation whose alignments supervise training of this one.
    pub fn seed(self) -> Option<Generation> {
        match self {
            Self::Mono => None,
            Self::Tri => Some(Self::Mono),
            Self::Lda => Some(Self::Tri),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GmmStep {
    Train,
    Align,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureSet {
    Train,
    Test,
}

impl FeatureSet {
    pub fn name(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
        }
    }
}

/// Which model family a feature set is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureKind {
    Gmm,
    Dnn,
}

/// One schedulable unit of work.
///
/// The derived ordering is the canonical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Stage {
    Features { set: FeatureSet, kind: FeatureKind },
    Gmm { generation: Generation, step: GmmStep },
    NnetTrain,
    NnetTest,
}

impl Stage {
    pub const CANONICAL_ORDER: [Stage; 15] = [
        Stage::features(FeatureSet::Train, FeatureKind::Gmm),
        Stage::features(FeatureSet::Train, FeatureKind::Dnn),
        Stage::features(FeatureSet::Test, FeatureKind::Gmm),
        Stage::features(FeatureSet::Test, FeatureKind::Dnn),
        Stage::gmm(GmmStep::Train, Generation::Mono),
        Stage::gmm(GmmStep::Align, Generation::Mono),
        Stage::gmm(GmmStep::Test, Generation::Mono),
        Stage::gmm(GmmStep::Train, Generation::Tri),
        Stage::gmm(GmmStep::Align, Generation::Tri),
        Stage::gmm(GmmStep::Test, Generation::Tri),
        Stage::gmm(GmmStep::Train, Generation::Lda),
        Stage::gmm(GmmStep::Align, Generation::Lda),
        Stage::gmm(GmmStep::Test, Generation::Lda),
        Stage::NnetTrain,
        Stage::NnetTest,
    ];

    pub const fn features(set: FeatureSet, kind: FeatureKind) -> Self {
        Self::Features { set, kind }
    }

    pub const fn gmm(step: GmmStep, generation: Generation) -> Self {
        Self::Gmm { generation, step }
    }

    /// The label used in configuration, logs and error messages.
    pub fn label(self) -> &'static str {
        use FeatureKind::{Dnn, Gmm};
        use FeatureSet::{Test as TestSet, Train as TrainSet};
        use Generation::{Lda, Mono, Tri};
        use GmmStep::{Align, Test, Train};

        match self {
            Self::Features { set: TrainSet, kind: Gmm } => "features(train,gmm)",
            Self::Features { set: TrainSet, kind: Dnn } => "features(train,dnn)",
            Self::Features { set: TestSet, kind: Gmm } => "features(test,gmm)",
            Self::Features { set: TestSet, kind: Dnn } => "features(test,dnn)",
            Self::Gmm { generation: Mono, step: Train } => "train(mono)",
            Self::Gmm { generation: Mono, step: Align } => "align(mono)",
            Self::Gmm { generation: Mono, step: Test } => "test(mono)",
            Self::Gmm { generation: Tri, step: Train } => "train(tri)",
            Self::Gmm { generation: Tri, step: Align } => "align(tri)",
            Self::Gmm { generation: Tri, step: Test } => "test(tri)",
            Self::Gmm { generation: Lda, step: Train } => "train(lda)",
            Self::Gmm { generation: Lda, step: Align } => "align(lda)",
            Self::Gmm { generation: Lda, step: Test } => "test(lda)",
            Self::NnetTrain => "train(nnet)",
            Self::NnetTest => "test(nnet)",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        Stage::CANONICAL_ORDER
            .into_iter()
            .find(|stage| stage.label() == wanted)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

impl TryFrom<String> for Stage {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        stage.label().to_string()
    }
}

/// The stages a run is asked to execute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSet {
    enabled: BTreeSet<Stage>,
}

impl StageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the set from `{stage: enabled}` flags; stages not named are off.
    pub fn from_flags(flags: &BTreeMap<Stage, bool>) -> Self {
        flags
            .iter()
            .filter(|(_, on)| **on)
            .map(|(&stage, _)| stage)
            .collect()
    }

    pub fn enable(&mut self, stage: Stage) {
        self.enabled.insert(stage);
    }

    pub fn disable(&mut self, stage: Stage) {
        self.enabled.remove(&stage);
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.enabled.contains(&stage)
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }

    /// Enabled stages in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = Stage> + '_ {
        self.enabled.iter().copied()
    }
}

impl FromIterator<Stage> for StageSet {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        Self {
            enabled: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_derived_order_is_canonical() {
        let mut sorted = Stage::CANONICAL_ORDER;
        sorted.sort();
        assert_eq!(sorted, Stage::CANONICAL_ORDER);
    }

    #[test]
    fn test_labels_are_unique_and_parse_back() {
        let labels: BTreeSet<_> = Stage::CANONICAL_ORDER.iter().map(|s| s.label()).collect();
        assert_eq!(labels.len(), 15);
        for stage in Stage::CANONICAL_ORDER {
            assert_eq!(stage.label().parse::<Stage>().unwrap(), stage);
        }
    }

    #[rstest]
    #[case("train(tri)", Stage::gmm(GmmStep::Train, Generation::Tri))]
    #[case(" align( lda ) ", Stage::gmm(GmmStep::Align, Generation::Lda))]
    #[case("features(test, dnn)", Stage::features(FeatureSet::Test, FeatureKind::Dnn))]
    #[case("test(nnet)", Stage::NnetTest)]
    fn test_parse(#[case] text: &str, #[case] expected: Stage) {
        assert_eq!(text.parse::<Stage>().unwrap(), expected);
    }

    #[test]
    fn test_parse_unknown() {
        assert!("train(quad)".parse::<Stage>().is_err());
    }

    #[test]
    fn test_generation_seeds() {
        assert_eq!(Generation::Mono.seed(), None);
        assert_eq!(Generation::Tri.seed(), Some(Generation::Mono));
        assert_eq!(Generation::Lda.seed(), Some(Generation::Tri));
    }

    #[test]
    fn test_stage_set_from_flags_iterates_canonically() {
        let flags: BTreeMap<Stage, bool> = serde_json::from_str(
            r#"{"test(nnet)": true, "train(mono)": true, "align(mono)": false, "features(train,gmm)": true}"#,
        )
        .unwrap();
        let set = StageSet::from_flags(&flags);
        let labels: Vec<_> = set.iter().map(Stage::label).collect();
        assert_eq!(labels, vec!["features(train,gmm)", "train(mono)", "test(nnet)"]);
        assert!(!set.contains(Stage::gmm(GmmStep::Align, Generation::Mono)));
    }

    #[test]
    fn test_stage_serializes_as_label() {
        let json = serde_json::to_string(&Stage::gmm(GmmStep::Test, Generation::Tri)).unwrap();
        assert_eq!(json, r#""test(tri)""#);
    }
}
