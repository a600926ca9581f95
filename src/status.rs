//! The four lifecycle states a task invocation moves through.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Start,
    Success,
    Fail,
    Replay,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Start => "start",
            Status::Success => "success",
            Status::Fail => "fail",
            Status::Replay => "replay",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Status::Start),
            "success" => Ok(Status::Success),
            "fail" => Ok(Status::Fail),
            "replay" => Ok(Status::Replay),
            other => Err(anyhow!("Unknown task status: {}", other)),
        }
    }
}
