//! Structured action descriptors for buttons and forms.
//!
//! Interactive components carry one opaque token. Instead of splitting
//! stringly-typed tokens all over the codebase, the token is decoded into
//! an [`ActionDescriptor`] exactly once at the router boundary and encoded
//! back when the desk emits a prompt.

use super::error::DeskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Panel button: open a fresh ticket.
    OpenTicket,
    DealInr,
    DealCrypto,
    RoleBuyer,
    RoleSeller,
    /// Button shown to the seller to open the terms form.
    TosOpen,
    /// Terms-of-sale form submission.
    TosForm,
    BuyerAccept,
    BuyerDeny,
    /// Deal-amount form submission.
    AmountForm,
    SellerConfirm,
    SellerCancel,
}

impl ActionKind {
    fn as_str(&self) -> &'static str {
        match self {
            ActionKind::OpenTicket => "open_ticket",
            ActionKind::DealInr => "deal_inr",
            ActionKind::DealCrypto => "deal_crypto",
            ActionKind::RoleBuyer => "role_buyer",
            ActionKind::RoleSeller => "role_seller",
            ActionKind::TosOpen => "tos_open",
            ActionKind::TosForm => "tos_form",
            ActionKind::BuyerAccept => "buyer_accept",
            ActionKind::BuyerDeny => "buyer_deny",
            ActionKind::AmountForm => "amount_form",
            ActionKind::SellerConfirm => "seller_confirm",
            ActionKind::SellerCancel => "seller_cancel",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "open_ticket" => ActionKind::OpenTicket,
            "deal_inr" => ActionKind::DealInr,
            "deal_crypto" => ActionKind::DealCrypto,
            "role_buyer" => ActionKind::RoleBuyer,
            "role_seller" => ActionKind::RoleSeller,
            "tos_open" => ActionKind::TosOpen,
            "tos_form" => ActionKind::TosForm,
            "buyer_accept" => ActionKind::BuyerAccept,
            "buyer_deny" => ActionKind::BuyerDeny,
            "amount_form" => ActionKind::AmountForm,
            "seller_confirm" => ActionKind::SellerConfirm,
            "seller_cancel" => ActionKind::SellerCancel,
            _ => return None,
        })
    }
}

/// A decoded component token: what to do, and to which ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub kind: ActionKind,
    /// Absent only for [`ActionKind::OpenTicket`], which precedes any ticket.
    pub ticket_id: Option<String>,
}

impl ActionDescriptor {
    pub fn new(kind: ActionKind, ticket_id: impl Into<String>) -> Self {
        Self {
            kind,
            ticket_id: Some(ticket_id.into()),
        }
    }

    pub fn open_ticket() -> Self {
        Self {
            kind: ActionKind::OpenTicket,
            ticket_id: None,
        }
    }

    pub fn encode(&self) -> String {
        match &self.ticket_id {
            Some(id) => format!("{}:{}", self.kind.as_str(), id),
            None => self.kind.as_str().to_string(),
        }
    }

    pub fn decode(token: &str) -> Result<Self, DeskError> {
        let (kind, ticket_id) = match token.split_once(':') {
            Some((kind, id)) if !id.is_empty() => (kind, Some(id.to_string())),
            Some((kind, _)) => (kind, None),
            None => (token, None),
        };
        let kind = ActionKind::from_str(kind)
            .ok_or_else(|| DeskError::Validation(format!("unrecognised action token: {token}")))?;
        if kind != ActionKind::OpenTicket && ticket_id.is_none() {
            return Err(DeskError::Validation(
                "this action token is missing its ticket reference".into(),
            ));
        }
        Ok(Self { kind, ticket_id })
    }
}
