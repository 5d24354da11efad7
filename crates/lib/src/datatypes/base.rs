//! Identity and operation-id issuance shared by every datatype.

use std::sync::Arc;

use tracing::debug;

use super::DatatypeState;
use crate::{
    context::ClientContext,
    types::{DatatypeType, Duid, OperationId, Uid},
};

#[derive(Debug)]
pub(crate) struct BaseDatatype {
    pub key: String,
    pub duid: Duid,
    pub typ: DatatypeType,
    pub state: DatatypeState,
    pub op_id: OperationId,
    pub ctx: Arc<ClientContext>,
}

impl BaseDatatype {
    pub fn new(
        key: impl Into<String>,
        typ: DatatypeType,
        state: DatatypeState,
        ctx: Arc<ClientContext>,
    ) -> Self {
        Self {
            key: key.into(),
            duid: Uid::new(),
            typ,
            state,
            op_id: OperationId::new(ctx.cuid),
            ctx,
        }
    }

    /// Change the lifecycle state, returning the transition when it changed.
    pub fn set_state(&mut self, state: DatatypeState) -> Option<(DatatypeState, DatatypeState)> {
        if self.state == state {
            return None;
        }
        let old = std::mem::replace(&mut self.state, state);
        debug!(
            key = %self.key,
            cuid = %self.ctx.cuid,
            from = %old,
            to = %state,
            "datatype state changed"
        );
        Some((old, state))
    }

    /// Forget local history after the server replaced it with a snapshot.
    pub fn reset_op_id(&mut self) {
        self.op_id = OperationId::new(self.ctx.cuid);
    }
}
