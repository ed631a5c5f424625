//! Ideal customer profile: the criteria a run qualifies prospects against.

use serde::{Deserialize, Serialize};

use qualiforge_core::{DomainError, IcpId};

/// Matching criteria for prospect qualification.
///
/// The scoring collaborator receives the whole profile and reports which
/// criteria a prospect matched and which it missed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdealCustomerProfile {
    pub id: IcpId,
    pub name: String,
    pub description: Option<String>,
    /// Criteria strings the scorer partitions into matched/gaps per prospect.
    pub criteria: Vec<String>,
}

impl IdealCustomerProfile {
    pub fn new(name: impl Into<String>, criteria: Vec<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("profile name cannot be empty"));
        }
        if criteria.is_empty() {
            return Err(DomainError::validation(
                "profile must define at least one criterion",
            ));
        }
        Ok(Self {
            id: IcpId::new(),
            name,
            description: None,
            criteria,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_requires_name_and_criteria() {
        let err = IdealCustomerProfile::new("  ", vec!["b2b".into()]).unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for blank name"),
        }

        let err = IdealCustomerProfile::new("SaaS mid-market", vec![]).unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for empty criteria"),
        }
    }

    #[test]
    fn profile_builder_sets_description() {
        let icp = IdealCustomerProfile::new("SaaS mid-market", vec!["b2b".into(), "50-500".into()])
            .unwrap()
            .with_description("Mid-market B2B SaaS companies");
        assert_eq!(icp.name, "SaaS mid-market");
        assert_eq!(icp.criteria.len(), 2);
        assert_eq!(
            icp.description.as_deref(),
            Some("Mid-market B2B SaaS companies")
        );
    }
}
