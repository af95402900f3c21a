use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{VerifierError, VerifierResult};

/// 聚类级别
///
/// 数据轨道 `L0 < L1 < L2 < HF`（日志），`H0 < HF`（指标）。
/// 每个数据级别都有一个心跳级别，记录“某主机在该分钟、该级别上报完成”。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterLevel {
    L0,
    L1,
    L2,
    H0,
    H1,
    H2,
    HF,
}

impl ClusterLevel {
    /// 分析完成后的最终级别
    pub const FINAL: ClusterLevel = ClusterLevel::HF;

    pub const ALL_HEARTBEATS: [ClusterLevel; 4] = [
        ClusterLevel::H0,
        ClusterLevel::H1,
        ClusterLevel::H2,
        ClusterLevel::HF,
    ];

    pub fn heartbeat(self) -> ClusterLevel {
        match self {
            ClusterLevel::L0 | ClusterLevel::H0 => ClusterLevel::H0,
            ClusterLevel::L1 | ClusterLevel::H1 => ClusterLevel::H1,
            ClusterLevel::L2 | ClusterLevel::H2 => ClusterLevel::H2,
            ClusterLevel::HF => ClusterLevel::HF,
        }
    }

    pub fn is_heartbeat(self) -> bool {
        matches!(
            self,
            ClusterLevel::H0 | ClusterLevel::H1 | ClusterLevel::H2 | ClusterLevel::HF
        )
    }

    /// 流水线阶段序号，数据级别与其心跳级别共享同一阶段
    pub fn rank(self) -> u8 {
        match self {
            ClusterLevel::L0 | ClusterLevel::H0 => 0,
            ClusterLevel::L1 | ClusterLevel::H1 => 1,
            ClusterLevel::L2 | ClusterLevel::H2 => 2,
            ClusterLevel::HF => 3,
        }
    }

    /// 级别只能单调前进
    pub fn ensure_advances_to(self, to: ClusterLevel) -> VerifierResult<()> {
        if to.rank() > self.rank() {
            Ok(())
        } else {
            Err(VerifierError::InvalidLevelTransition { from: self, to })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClusterLevel::L0 => "L0",
            ClusterLevel::L1 => "L1",
            ClusterLevel::L2 => "L2",
            ClusterLevel::H0 => "H0",
            ClusterLevel::H1 => "H1",
            ClusterLevel::H2 => "H2",
            ClusterLevel::HF => "HF",
        }
    }
}

impl Ord for ClusterLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.rank(), self.is_heartbeat()).cmp(&(other.rank(), other.is_heartbeat()))
    }
}

impl PartialOrd for ClusterLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ClusterLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterLevel {
    type Err = VerifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L0" => Ok(ClusterLevel::L0),
            "L1" => Ok(ClusterLevel::L1),
            "L2" => Ok(ClusterLevel::L2),
            "H0" => Ok(ClusterLevel::H0),
            "H1" => Ok(ClusterLevel::H1),
            "H2" => Ok(ClusterLevel::H2),
            "HF" => Ok(ClusterLevel::HF),
            _ => Err(VerifierError::Serialization(format!(
                "Invalid cluster level: {s}"
            ))),
        }
    }
}
