//! Stage pipeline for privileged (system chaincode) calls.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`] objects fixed at construction.
//! Each stage receives a [`Next`] capability: calling [`Next::run`] continues
//! the chain, returning without calling it short-circuits. When the last stage
//! calls `next`, the chain ends and the first selected endorsement's payload
//! is returned.
//!
//! The standard chain is
//! proposal dispatch → endorsement selection → endorsement validation.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::retry::ENDORSEMENT_MISMATCH;
use crate::core::types::{ChannelCall, ErrorGroup, Target, TransportError};
use crate::io::network::{Endorser, ProposalResponse};

/// Endorser client: fewer endorsements than required.
pub const MISSING_ENDORSEMENT: i32 = 9;
/// Highest proposal response status treated as success.
const MAX_SUCCESS_STATUS: i32 = 399;

/// State shared by the stages of one pipeline run.
pub struct PipelineContext<'a> {
    pub endorser: &'a dyn Endorser,
    pub targets: &'a [Target],
    pub timeout: Duration,
    /// Every proposal response received.
    pub responses: Vec<ProposalResponse>,
    /// Responses that count as endorsements.
    pub endorsements: Vec<ProposalResponse>,
}

pub trait Stage {
    fn name(&self) -> &'static str;

    fn handle(
        &self,
        ctx: &mut PipelineContext<'_>,
        call: &ChannelCall,
        next: Next<'_>,
    ) -> Result<String, TransportError>;
}

/// Continuation handed to a stage: the stages after it.
pub struct Next<'a> {
    stages: &'a [Box<dyn Stage>],
}

impl Next<'_> {
    pub fn run(
        self,
        ctx: &mut PipelineContext<'_>,
        call: &ChannelCall,
    ) -> Result<String, TransportError> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                debug!(stage = stage.name(), "entering stage");
                stage.handle(ctx, call, Next { stages: rest })
            }
            None => finish(ctx),
        }
    }
}

fn finish(ctx: &PipelineContext<'_>) -> Result<String, TransportError> {
    ctx.endorsements
        .first()
        .map(|response| response.payload.clone())
        .ok_or_else(|| {
            TransportError::new(
                ErrorGroup::EndorserClient,
                MISSING_ENDORSEMENT,
                "pipeline finished without endorsements",
            )
        })
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Dispatch → selection (only `msp_id` endorsements when given) → validation.
    pub fn standard(msp_id: Option<String>, min_endorsements: usize) -> Self {
        Self::new(vec![
            Box::new(ProposalDispatchStage),
            Box::new(EndorsementSelectionStage { msp_id }),
            Box::new(EndorsementValidationStage { min_endorsements }),
        ])
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    #[instrument(skip_all, fields(chaincode = %call.request.chaincode_id, stages = self.stages.len()))]
    pub fn execute(
        &self,
        endorser: &dyn Endorser,
        call: &ChannelCall,
        targets: &[Target],
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let mut ctx = PipelineContext {
            endorser,
            targets,
            timeout,
            responses: Vec::new(),
            endorsements: Vec::new(),
        };
        Next {
            stages: &self.stages,
        }
        .run(&mut ctx, call)
    }
}

/// Sends the proposal to every target and records the responses.
pub struct ProposalDispatchStage;

impl Stage for ProposalDispatchStage {
    fn name(&self) -> &'static str {
        "proposal-dispatch"
    }

    fn handle(
        &self,
        ctx: &mut PipelineContext<'_>,
        call: &ChannelCall,
        next: Next<'_>,
    ) -> Result<String, TransportError> {
        ctx.responses = ctx
            .endorser
            .process_proposal(call, ctx.targets, ctx.timeout)?;
        debug!(responses = ctx.responses.len(), "proposal responses received");
        next.run(ctx, call)
    }
}

/// Chooses which responses count as endorsements: successful ones, optionally
/// restricted to a single MSP.
pub struct EndorsementSelectionStage {
    pub msp_id: Option<String>,
}

impl Stage for EndorsementSelectionStage {
    fn name(&self) -> &'static str {
        "endorsement-selection"
    }

    fn handle(
        &self,
        ctx: &mut PipelineContext<'_>,
        call: &ChannelCall,
        next: Next<'_>,
    ) -> Result<String, TransportError> {
        let candidates = ctx
            .responses
            .iter()
            .filter(|r| self.msp_id.as_ref().is_none_or(|msp| *msp == r.msp_id));
        let (ok, failed): (Vec<&ProposalResponse>, Vec<&ProposalResponse>) =
            candidates.partition(|r| r.status <= MAX_SUCCESS_STATUS);

        if ok.is_empty() {
            let err = match failed.first() {
                Some(r) => TransportError::new(
                    ErrorGroup::EndorserServer,
                    r.status,
                    format!("proposal failed on [{}]: {}", r.endorser, r.message),
                ),
                None => TransportError::new(
                    ErrorGroup::EndorserClient,
                    MISSING_ENDORSEMENT,
                    "no proposal responses to select endorsements from",
                ),
            };
            warn!(%err, "no endorsements selected");
            return Err(err);
        }

        ctx.endorsements = ok.into_iter().cloned().collect();
        next.run(ctx, call)
    }
}

/// Requires enough endorsements and identical payloads across them.
pub struct EndorsementValidationStage {
    pub min_endorsements: usize,
}

impl Stage for EndorsementValidationStage {
    fn name(&self) -> &'static str {
        "endorsement-validation"
    }

    fn handle(
        &self,
        ctx: &mut PipelineContext<'_>,
        call: &ChannelCall,
        next: Next<'_>,
    ) -> Result<String, TransportError> {
        if ctx.endorsements.len() < self.min_endorsements {
            return Err(TransportError::new(
                ErrorGroup::EndorserClient,
                MISSING_ENDORSEMENT,
                format!(
                    "{} endorsement(s) received, {} required",
                    ctx.endorsements.len(),
                    self.min_endorsements
                ),
            ));
        }
        if let Some(first) = ctx.endorsements.first()
            && let Some(other) = ctx
                .endorsements
                .iter()
                .find(|r| r.payload != first.payload)
        {
            return Err(TransportError::new(
                ErrorGroup::EndorserClient,
                ENDORSEMENT_MISMATCH,
                format!(
                    "payloads from [{}] and [{}] do not match",
                    first.endorser, other.endorser
                ),
            ));
        }
        next.run(ctx, call)
    }
}
