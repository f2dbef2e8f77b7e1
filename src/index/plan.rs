use std::fmt;

use crate::{
    error::{Error, Result},
    keys::IndexPrefix,
    profile::{Labels, ProfileType},
};

use super::TimeRange;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindProfilesRequest {
    pub service: String,
    pub profile_type: Option<ProfileType>,
    pub labels: Labels,
    // Inclusive bounds on creation time, nanoseconds since the epoch. Unset
    // means unbounded on that side.
    pub created_at_min: Option<u64>,
    pub created_at_max: Option<u64>,
    /// Maximum number of ids to return, 0 for no limit.
    ///
    /// When more ids match, the *oldest* `limit` of them are kept (smallest
    /// creation time first), not the most recent ones.
    pub limit: usize,
}

impl FindProfilesRequest {
    pub fn new(service: impl Into<String>) -> Self {
        FindProfilesRequest {
            service: service.into(),
            ..Default::default()
        }
    }

    pub fn profile_type(mut self, profile_type: ProfileType) -> Self {
        self.profile_type = Some(profile_type);
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.add(key, value);
        self
    }

    pub fn labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn created_between(mut self, min: u64, max: u64) -> Self {
        self.created_at_min = Some(min);
        self.created_at_max = Some(max);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

// Names every constraint that was set: `service "api" type cpu labels
// env=prod,az=a created 10..=20`.
impl fmt::Display for FindProfilesRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service {:?}", self.service)?;
        if let Some(t) = self.profile_type {
            write!(f, " type {}", t)?;
        }
        for (i, label) in self.labels.iter().enumerate() {
            let sep = if i == 0 { " labels " } else { "," };
            write!(f, "{}{}", sep, label)?;
        }
        match (self.created_at_min, self.created_at_max) {
            (None, None) => Ok(()),
            (Some(min), None) => write!(f, " created {}..", min),
            (None, Some(max)) => write!(f, " created ..={}", max),
            (Some(min), Some(max)) => write!(f, " created {}..={}", min, max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    // The by-service or by-service-type prefix first, then one per label.
    pub prefixes: Vec<IndexPrefix>,
    pub range: TimeRange,
    pub limit: usize,
}

pub fn plan(req: &FindProfilesRequest) -> Result<QueryPlan> {
    if req.service.is_empty() {
        return Err(Error::InvalidRequest("service is empty".into()));
    }
    let range = TimeRange::new(
        req.created_at_min.unwrap_or(0),
        req.created_at_max.unwrap_or(u64::MAX),
    );
    if range.min > range.max {
        return Err(Error::InvalidRequest(format!(
            "created_at_min {} is after created_at_max {}",
            range.min, range.max
        )));
    }

    let mut prefixes = Vec::with_capacity(1 + req.labels.len());
    prefixes.push(match req.profile_type {
        Some(t) => IndexPrefix::service_type(&req.service, t),
        None => IndexPrefix::service(&req.service),
    });
    for label in &req.labels {
        prefixes.push(IndexPrefix::service_label(&req.service, label));
    }

    Ok(QueryPlan {
        prefixes,
        range,
        limit: req.limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{keys::IndexKind, profile::Label};

    #[test]
    fn test_plan_prefixes() {
        let p = plan(&FindProfilesRequest::new("api")).unwrap();
        assert_eq!(p.prefixes, vec![IndexPrefix::service("api")]);
        assert_eq!(p.range, TimeRange::all());
        assert_eq!(p.limit, 0);

        let p = plan(
            &FindProfilesRequest::new("api")
                .profile_type(ProfileType::Cpu)
                .label("env", "prod")
                .label("region", "eu")
                .created_between(5, 9)
                .limit(3),
        )
        .unwrap();
        assert_eq!(
            p.prefixes,
            vec![
                IndexPrefix::service_type("api", ProfileType::Cpu),
                IndexPrefix::service_label("api", &Label::new("env", "prod")),
                IndexPrefix::service_label("api", &Label::new("region", "eu")),
            ]
        );
        assert_eq!(p.prefixes[0].kind(), IndexKind::ServiceType);
        assert_eq!(p.range, TimeRange::new(5, 9));
        assert_eq!(p.limit, 3);
    }

    #[test]
    fn test_open_ended_range() {
        let mut req = FindProfilesRequest::new("api");
        req.created_at_min = Some(7);
        assert_eq!(plan(&req).unwrap().range, TimeRange::new(7, u64::MAX));

        let mut req = FindProfilesRequest::new("api");
        req.created_at_max = Some(7);
        assert_eq!(plan(&req).unwrap().range, TimeRange::new(0, 7));
    }

    #[test]
    fn test_request_display() {
        assert_eq!(FindProfilesRequest::new("api").to_string(), r#"service "api""#);
        assert_eq!(
            FindProfilesRequest::new("api")
                .profile_type(ProfileType::Heap)
                .label("env", "prod")
                .label("az", "a")
                .created_between(10, 20)
                .limit(5)
                .to_string(),
            r#"service "api" type heap labels env=prod,az=a created 10..=20"#
        );
        let mut req = FindProfilesRequest::new("api");
        req.created_at_min = Some(3);
        assert_eq!(req.to_string(), r#"service "api" created 3.."#);
        req.created_at_min = None;
        req.created_at_max = Some(4);
        assert_eq!(req.to_string(), r#"service "api" created ..=4"#);
    }

    #[test]
    fn test_invalid_requests() {
        let err = plan(&FindProfilesRequest::new("")).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)), "{}", err);

        let err = plan(&FindProfilesRequest::new("api").created_between(10, 9)).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)), "{}", err);

        // A single instant is fine.
        assert!(plan(&FindProfilesRequest::new("api").created_between(9, 9)).is_ok());
    }
}
