//! Payer resolution shared by the balance pre-check and the charge pipeline

use runledger_shared::{BalanceOwner, Organization, QuestionType};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::OrganizationStore;

/// An organization that can be billed: it exists and belongs to a partner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillableOrg {
    pub org_id: Uuid,
    pub partner_id: Uuid,
    pub is_free_tier: bool,
}

impl BillableOrg {
    pub fn from_organization(org: &Organization) -> BillingResult<Self> {
        let partner_id = org
            .partner_id
            .filter(|id| !id.is_nil())
            .ok_or(BillingError::NoPartner(org.id))?;

        Ok(Self {
            org_id: org.id,
            partner_id,
            is_free_tier: org.is_free_tier,
        })
    }

    /// Balance that pays for this organization's questions of the given type
    pub fn payer(&self, question_type: QuestionType) -> BalanceOwner {
        resolve_payer(self.org_id, self.partner_id, self.is_free_tier, question_type)
    }
}

/// Network questions and free-tier organizations bill the partner; everything
/// else bills the organization
pub fn resolve_payer(
    org_id: Uuid,
    partner_id: Uuid,
    is_free_tier: bool,
    question_type: QuestionType,
) -> BalanceOwner {
    match question_type {
        QuestionType::Network => BalanceOwner::Partner(partner_id),
        QuestionType::Org if is_free_tier => BalanceOwner::Partner(partner_id),
        QuestionType::Org => BalanceOwner::Org(org_id),
    }
}

/// Load an organization and require a partner association
pub async fn load_billable_org(
    organizations: &dyn OrganizationStore,
    org_id: Uuid,
) -> BillingResult<BillableOrg> {
    let org = organizations
        .get_organization(org_id)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("organization {}", org_id)))?;

    BillableOrg::from_organization(&org)
}
