//! Append-only transition records kept for every requisition
use crate::requisition::{Amount, ApprovalStatus, RequisitionId, TimeStamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    #[n(0)]
    pub requisition_id: RequisitionId,
    #[n(1)]
    pub from: Option<ApprovalStatus>, // None for the creation record
    #[n(2)]
    pub to: ApprovalStatus,
    #[n(3)]
    #[serde(flatten)]
    pub kind: TransitionKind,
    #[n(4)]
    pub at: TimeStamp,
}

#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    #[n(0)]
    Created,
    #[n(1)]
    Approved,
    #[n(2)]
    RiskRejected {
        #[n(0)]
        reason: String,
    },
    #[n(3)]
    BulkReviewed {
        #[n(0)]
        threshold: Amount,
    },
    #[n(4)]
    DetailsUpdated,
    #[n(5)]
    RiskScored {
        #[n(0)]
        score: u8,
    },
}

impl TransitionRecord {
    pub fn new(
        requisition_id: RequisitionId,
        from: Option<ApprovalStatus>,
        to: ApprovalStatus,
        kind: TransitionKind,
        at: TimeStamp,
    ) -> Self {
        Self {
            requisition_id,
            from,
            to,
            kind,
            at,
        }
    }

    /// Encode the record and return it with its sha256 digest.
    pub fn build(&self) -> anyhow::Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }

    /// Key under which the record is stored: `<requisition id>/<seq>/<digest>`,
    /// with `seq` zero padded so a prefix scan of `<requisition id>/` returns
    /// one requisition's history in write order.
    pub fn storage_key(&self, seq: u64) -> anyhow::Result<(Vec<u8>, Vec<u8>)> {
        let (hash, cbor) = self.build()?;
        let key = format!("{}/{seq:020}/{hash}", self.requisition_id).into_bytes();
        Ok((key, cbor))
    }

    pub fn changed_status(&self) -> bool {
        self.from != Some(self.to)
    }
}

pub fn history_prefix(id: &RequisitionId) -> Vec<u8> {
    format!("{id}/").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: TransitionKind) -> TransitionRecord {
        TransitionRecord::new(
            RequisitionId::from("req1xyz"),
            Some(ApprovalStatus::Pending),
            ApprovalStatus::Rejected,
            kind,
            TimeStamp::new(),
        )
    }

    #[test]
    fn identical_records_share_a_digest() {
        let a = record(TransitionKind::Approved);
        let b = a.clone();

        assert_eq!(a.build().unwrap().0, b.build().unwrap().0);
    }

    #[test]
    fn storage_key_is_scoped_to_requisition() {
        let r = record(TransitionKind::RiskRejected {
            reason: "vendor flagged".into(),
        });
        let (key, cbor) = r.storage_key(7).unwrap();

        assert!(key.starts_with(&history_prefix(&r.requisition_id)));
        let decoded: TransitionRecord = minicbor::decode(&cbor).unwrap();
        assert_eq!(decoded, r);
    }

    #[test]
    fn keys_order_by_sequence_not_digest() {
        let first = record(TransitionKind::RiskRejected {
            reason: "zzz".into(),
        });
        let second = TransitionRecord {
            kind: TransitionKind::Approved,
            ..first.clone()
        };

        let (a, _) = first.storage_key(9).unwrap();
        let (b, _) = second.storage_key(10).unwrap();
        let (c, _) = second.storage_key(100).unwrap();

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn serializes_kind_inline() {
        let r = record(TransitionKind::RiskRejected {
            reason: "score 95".into(),
        });
        let json = serde_json::to_value(&r).unwrap();

        assert_eq!(json["kind"], "RISK_REJECTED");
        assert_eq!(json["reason"], "score 95");
        assert_eq!(json["from"], "PENDING");
        assert_eq!(json["to"], "REJECTED");
    }
}
