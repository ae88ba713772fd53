//! Per-kind status enums and their transition tables.
//!
//! Every table is an exhaustive `match` on the current status, so a new status
//! does not compile until its outgoing edges are decided.

use serde::{Deserialize, Serialize};

/// The four provisional document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    BookingOrder,
    ProformaInvoice,
    DispatchNote,
    ReturnInward,
}

impl DocumentKind {
    pub fn number_prefix(self) -> &'static str {
        match self {
            DocumentKind::BookingOrder => "BO",
            DocumentKind::ProformaInvoice => "PI",
            DocumentKind::DispatchNote => "DN",
            DocumentKind::ReturnInward => "RI",
        }
    }

    pub fn initial_status(self) -> DocumentStatus {
        match self {
            DocumentKind::BookingOrder => DocumentStatus::Booking(BookingStatus::Pending),
            DocumentKind::ProformaInvoice => DocumentStatus::Proforma(ProformaStatus::Draft),
            DocumentKind::DispatchNote => DocumentStatus::Dispatch(DispatchStatus::Pending),
            DocumentKind::ReturnInward => DocumentStatus::Return(ReturnStatus::Created),
        }
    }

    /// Whether documents of this kind convert into a final invoice.
    pub fn converts_to_invoice(self) -> bool {
        matches!(self, DocumentKind::BookingOrder | DocumentKind::ProformaInvoice)
    }
}

impl core::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DocumentKind::BookingOrder => "booking order",
            DocumentKind::ProformaInvoice => "proforma invoice",
            DocumentKind::DispatchNote => "dispatch note",
            DocumentKind::ReturnInward => "return inward",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Ready,
    Delivered,
    Cancelled,
    Converted,
}

impl BookingStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        use BookingStatus::*;
        match self {
            Pending => matches!(next, Confirmed | Cancelled),
            Confirmed => matches!(next, Ready | Cancelled),
            Ready => matches!(next, Delivered | Cancelled | Converted),
            // Terminal for the delivery flow, but still invoiceable.
            Delivered => matches!(next, Converted),
            Cancelled | Converted => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        use BookingStatus::*;
        match self {
            Pending | Confirmed | Ready => false,
            Delivered | Cancelled | Converted => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProformaStatus {
    Draft,
    Sent,
    Accepted,
    Rejected,
    Converted,
    /// Only ever derived from `valid_until`; never requested by a user.
    Expired,
}

impl ProformaStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        use ProformaStatus::*;
        match self {
            Draft => matches!(next, Sent | Rejected | Converted),
            Sent => matches!(next, Accepted | Rejected | Converted),
            Accepted => matches!(next, Converted),
            Rejected | Converted | Expired => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        use ProformaStatus::*;
        match self {
            Draft | Sent | Accepted => false,
            Rejected | Converted | Expired => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Pending,
    InTransit,
    Delivered,
    Returned,
}

impl DispatchStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        use DispatchStatus::*;
        match self {
            Pending => matches!(next, InTransit),
            InTransit => matches!(next, Delivered | Returned),
            Delivered | Returned => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        use DispatchStatus::*;
        match self {
            Pending | InTransit => false,
            Delivered | Returned => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Created,
    Processed,
}

impl ReturnStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        use ReturnStatus::*;
        match self {
            Created => matches!(next, Processed),
            Processed => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        match self {
            ReturnStatus::Created => false,
            ReturnStatus::Processed => true,
        }
    }
}

/// Status of any document, tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    Booking(BookingStatus),
    Proforma(ProformaStatus),
    Dispatch(DispatchStatus),
    Return(ReturnStatus),
}

impl DocumentStatus {
    pub fn kind(self) -> DocumentKind {
        match self {
            DocumentStatus::Booking(_) => DocumentKind::BookingOrder,
            DocumentStatus::Proforma(_) => DocumentKind::ProformaInvoice,
            DocumentStatus::Dispatch(_) => DocumentKind::DispatchNote,
            DocumentStatus::Return(_) => DocumentKind::ReturnInward,
        }
    }

    /// Table lookup. Statuses of different kinds never connect.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        match (self, next) {
            (DocumentStatus::Booking(a), DocumentStatus::Booking(b)) => a.can_transition_to(b),
            (DocumentStatus::Proforma(a), DocumentStatus::Proforma(b)) => a.can_transition_to(b),
            (DocumentStatus::Dispatch(a), DocumentStatus::Dispatch(b)) => a.can_transition_to(b),
            (DocumentStatus::Return(a), DocumentStatus::Return(b)) => a.can_transition_to(b),
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        match self {
            DocumentStatus::Booking(s) => s.is_terminal(),
            DocumentStatus::Proforma(s) => s.is_terminal(),
            DocumentStatus::Dispatch(s) => s.is_terminal(),
            DocumentStatus::Return(s) => s.is_terminal(),
        }
    }

    pub fn is_initial(self) -> bool {
        self == self.kind().initial_status()
    }

    /// The terminal "converted" status for kinds that convert into an invoice.
    pub fn converted(kind: DocumentKind) -> Option<DocumentStatus> {
        match kind {
            DocumentKind::BookingOrder => Some(DocumentStatus::Booking(BookingStatus::Converted)),
            DocumentKind::ProformaInvoice => {
                Some(DocumentStatus::Proforma(ProformaStatus::Converted))
            }
            DocumentKind::DispatchNote | DocumentKind::ReturnInward => None,
        }
    }

    pub fn is_converted(self) -> bool {
        matches!(
            self,
            DocumentStatus::Booking(BookingStatus::Converted)
                | DocumentStatus::Proforma(ProformaStatus::Converted)
        )
    }

    /// Whether the conversion protocol may start from this status.
    pub fn can_convert(self) -> bool {
        match DocumentStatus::converted(self.kind()) {
            Some(target) => self.can_transition_to(target),
            None => false,
        }
    }

    /// Statuses only reachable through a dedicated engine operation rather than
    /// a plain transition request.
    pub fn is_protocol_only(self) -> bool {
        matches!(
            self,
            DocumentStatus::Booking(BookingStatus::Converted)
                | DocumentStatus::Proforma(ProformaStatus::Converted)
                | DocumentStatus::Proforma(ProformaStatus::Expired)
                | DocumentStatus::Return(ReturnStatus::Processed)
        )
    }

    pub fn all() -> Vec<DocumentStatus> {
        use BookingStatus as B;
        use DispatchStatus as D;
        use ProformaStatus as P;
        use ReturnStatus as R;
        let mut out = Vec::new();
        out.extend(
            [B::Pending, B::Confirmed, B::Ready, B::Delivered, B::Cancelled, B::Converted]
                .map(DocumentStatus::Booking),
        );
        out.extend(
            [P::Draft, P::Sent, P::Accepted, P::Rejected, P::Converted, P::Expired]
                .map(DocumentStatus::Proforma),
        );
        out.extend([D::Pending, D::InTransit, D::Delivered, D::Returned].map(DocumentStatus::Dispatch));
        out.extend([R::Created, R::Processed].map(DocumentStatus::Return));
        out
    }
}

impl core::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use BookingStatus as B;
        use DispatchStatus as D;
        use ProformaStatus as P;
        use ReturnStatus as R;
        let s = match self {
            DocumentStatus::Booking(s) => match s {
                B::Pending => "pending",
                B::Confirmed => "confirmed",
                B::Ready => "ready",
                B::Delivered => "delivered",
                B::Cancelled => "cancelled",
                B::Converted => "converted",
            },
            DocumentStatus::Proforma(s) => match s {
                P::Draft => "draft",
                P::Sent => "sent",
                P::Accepted => "accepted",
                P::Rejected => "rejected",
                P::Converted => "converted",
                P::Expired => "expired",
            },
            DocumentStatus::Dispatch(s) => match s {
                D::Pending => "pending",
                D::InTransit => "in_transit",
                D::Delivered => "delivered",
                D::Returned => "returned",
            },
            DocumentStatus::Return(s) => match s {
                R::Created => "created",
                R::Processed => "processed",
            },
        };
        f.write_str(s)
    }
}
