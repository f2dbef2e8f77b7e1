use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{BoxError, Error};

mod sample;

pub use sample::SampleProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ProfileType {
    Cpu = 1,
    Heap = 2,
    Block = 3,
    Mutex = 4,
    Goroutine = 5,
    Threadcreate = 6,
    Other = 127,
}

impl ProfileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileType::Cpu => "cpu",
            ProfileType::Heap => "heap",
            ProfileType::Block => "block",
            ProfileType::Mutex => "mutex",
            ProfileType::Goroutine => "goroutine",
            ProfileType::Threadcreate => "threadcreate",
            ProfileType::Other => "other",
        }
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(ProfileType::Cpu),
            "heap" => Ok(ProfileType::Heap),
            "block" => Ok(ProfileType::Block),
            "mutex" => Ok(ProfileType::Mutex),
            "goroutine" => Ok(ProfileType::Goroutine),
            "threadcreate" => Ok(ProfileType::Threadcreate),
            "other" => Ok(ProfileType::Other),
            _ => Err(Error::InvalidRequest(format!("unknown profile type {:?}", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Label {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels(Vec<Label>);

impl Labels {
    pub fn new() -> Self {
        Labels(Vec::new())
    }

    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push(Label::new(key, value));
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Label>> for Labels {
    fn from(labels: Vec<Label>) -> Self {
        Labels(labels)
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// Parses `k1=v1,k2=v2`. An empty string is an empty set.
impl FromStr for Labels {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut labels = Labels::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((k, v)) if !k.is_empty() => labels.add(k, v),
                _ => {
                    return Err(Error::InvalidRequest(format!(
                        "label {:?} is not of the form key=value",
                        pair
                    )))
                }
            }
        }
        Ok(labels)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMeta {
    pub service: String,
    pub instance_id: String,
    pub labels: Labels,
}

impl ProfileMeta {
    pub fn new(service: impl Into<String>, instance_id: impl Into<String>) -> Self {
        ProfileMeta {
            service: service.into(),
            instance_id: instance_id.into(),
            labels: Labels::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.add(key, value);
        self
    }
}

// A parsed profile payload. The store treats the serialized form as opaque;
// it only needs the embedded creation time for indexing and a way to combine
// several payloads into one.
pub trait Profile: Sized {
    // Creation time embedded in the payload, nanoseconds since the unix epoch.
    fn time_nanos(&self) -> u64;

    fn encode(&self) -> Result<Vec<u8>, BoxError>;

    fn decode(buf: &[u8]) -> Result<Self, BoxError>;

    fn merge(profiles: Vec<Self>) -> Result<Self, BoxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_type_names() {
        assert_eq!("CPU".parse::<ProfileType>().unwrap(), ProfileType::Cpu);
        assert_eq!(
            "threadcreate".parse::<ProfileType>().unwrap() as u8,
            6
        );
        assert_eq!(ProfileType::Other as u8, 127);
        assert!("wall".parse::<ProfileType>().is_err());
        for t in [ProfileType::Heap, ProfileType::Goroutine] {
            assert_eq!(t.to_string().parse::<ProfileType>().unwrap(), t);
        }
    }

    #[test]
    fn test_parse_labels() {
        let labels: Labels = "env=prod, region=eu-west".parse().unwrap();
        assert_eq!(
            labels,
            Labels::from(vec![Label::new("env", "prod"), Label::new("region", "eu-west")])
        );
        assert!("".parse::<Labels>().unwrap().is_empty());
        assert!("env".parse::<Labels>().is_err());
        assert!("=prod".parse::<Labels>().is_err());
        // Values may be empty or contain '='.
        let labels: Labels = "a=,b=x=y".parse().unwrap();
        let got: Vec<_> = labels.iter().map(|l| l.to_string()).collect();
        assert_eq!(got, vec!["a=", "b=x=y"]);
    }
}
