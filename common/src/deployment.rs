use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// States a deployment can be in.
///
/// In-progress states only move forward, either to the next in-progress
/// state or to a terminal one. Terminal states never re-open, with the
/// single exception of `Running` being rewritten to `Superseded` when a
/// newer deployment of the same service comes up.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Display, Serialize, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[strum(ascii_case_insensitive)]
pub enum Status {
    /// The repository is being probed for a buildable project
    Inspecting,
    /// The builder is compiling a container image
    Building,
    /// The image is being rolled out onto the cluster
    Deploying,
    /// The deployment is live behind its stable endpoint
    Running,
    /// A newer deployment of the same service took over
    Superseded,
    /// Repository inspection aborted
    InspectingFail,
    /// The builder reported a failed build
    BuildingFail,
    /// The cluster rollout aborted
    DeployingFail,
    InspectingTimeout,
    BuildingTimeout,
    DeployingTimeout,
}

impl Status {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Inspecting | Self::Building | Self::Deploying)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_progress()
    }

    /// The state recorded when the stage this status names aborts.
    pub fn failed(&self) -> Option<Self> {
        match self {
            Self::Inspecting => Some(Self::InspectingFail),
            Self::Building => Some(Self::BuildingFail),
            Self::Deploying => Some(Self::DeployingFail),
            _ => None,
        }
    }

    /// The state the orphan sweeper rewrites a stuck in-progress row to.
    pub fn timed_out(&self) -> Option<Self> {
        match self {
            Self::Inspecting => Some(Self::InspectingTimeout),
            Self::Building => Some(Self::BuildingTimeout),
            Self::Deploying => Some(Self::DeployingTimeout),
            _ => None,
        }
    }
}
