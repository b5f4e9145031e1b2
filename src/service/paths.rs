use actix_web::{error, HttpResponse, Result};
use actix_web::web::{Data, Json, Path};
use chrono::Utc;

use crate::lifecycle::{ClosePollError, CreatePollError, DeletePollError, PurgeError};
use crate::model::*;
use crate::operations::{ListPollsError, PollOperationsT};
use crate::vote::{VoteError, VoteEvent};

pub const POLLS_PATH: &str = "/polls";
pub const PURGE_PATH: &str = "/polls/purge";
pub const POLL_PATH: &str = "/polls/{poll_id}";
pub const CLOSE_PATH: &str = "/polls/{poll_id}/close";
pub const VOTES_PATH: &str = "/polls/{poll_id}/votes";

pub async fn post_poll_handler<A: 'static + PollOperationsT>(
    ops: Data<A>,
    body: Json<CreatePollRequest>) -> Result<Json<PollSummary>>
{
    let Json(request) = body;
    let poll = ops.create_poll(&request)
        .await
        .map_err(|e| match e {
            CreatePollError::ChannelNotConfigured =>
                error::ErrorBadRequest("No channel given and no default channel configured."),
            CreatePollError::ChannelBusy(id) =>
                error::ErrorConflict(format!("Poll {} is still active in this channel.", id)),
            CreatePollError::ChannelUnavailable(channel) =>
                error::ErrorBadGateway(format!("Channel {} is unavailable.", channel)),
            CreatePollError::Unexpected =>
                error::ErrorInternalServerError("Unexpected error."),
        })?;
    Ok(Json(poll))
}

pub async fn get_polls_handler<A: 'static + PollOperationsT>(
    ops: Data<A>) -> Result<Json<Vec<PollSummary>>>
{
    let polls = ops.list_active()
        .await
        .map_err(|e| match e {
            ListPollsError::Unexpected => error::ErrorInternalServerError("Unexpected error."),
        })?;
    Ok(Json(polls))
}

pub async fn post_vote_handler<A: 'static + PollOperationsT>(
    ops: Data<A>,
    path: Path<i64>,
    body: Json<PutVoteRequest>) -> Result<Json<VoteResponse>>
{
    let Json(request) = body;
    let event = VoteEvent::from_request(PollId(path.into_inner()), request, Utc::now())
        .map_err(vote_error)?;
    let response = ops.vote(event)
        .await
        .map_err(vote_error)?;
    Ok(Json(response))
}

fn vote_error(e: VoteError) -> error::Error {
    match e {
        VoteError::InvalidOption(index) =>
            error::ErrorBadRequest(format!("Invalid option: [{}]", index)),
        VoteError::PollNotFound => error::ErrorNotFound("Poll not found."),
        VoteError::PollClosed => error::ErrorGone("Poll has ended."),
        VoteError::Unexpected => error::ErrorInternalServerError("Unexpected error."),
    }
}

pub async fn close_poll_handler<A: 'static + PollOperationsT>(
    ops: Data<A>,
    path: Path<i64>) -> Result<HttpResponse>
{
    ops.close_poll(PollId(path.into_inner()))
        .await
        .map_err(|e| match e {
            ClosePollError::NotFound => error::ErrorNotFound("Poll not found."),
            ClosePollError::Unexpected => error::ErrorInternalServerError("Unexpected error."),
        })?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn delete_poll_handler<A: 'static + PollOperationsT>(
    ops: Data<A>,
    path: Path<i64>) -> Result<HttpResponse>
{
    ops.delete_poll(PollId(path.into_inner()))
        .await
        .map_err(|e| match e {
            DeletePollError::NotFound => error::ErrorNotFound("Poll not found."),
            DeletePollError::StillActive => error::ErrorConflict("Poll is still active."),
            DeletePollError::Unexpected => error::ErrorInternalServerError("Unexpected error."),
        })?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn purge_handler<A: 'static + PollOperationsT>(
    ops: Data<A>,
    body: Json<PurgeRequest>) -> Result<Json<PurgeResponse>>
{
    let Json(request) = body;
    if request.older_than_days < 0 {
        return Err(error::ErrorBadRequest("older_than_days must not be negative."));
    }
    let purged = ops.purge_ended(&request)
        .await
        .map_err(|e| match e {
            PurgeError::InvalidWindow =>
                error::ErrorBadRequest("older_than_days is out of range."),
            PurgeError::Unexpected => error::ErrorInternalServerError("Unexpected error."),
        })?;
    Ok(Json(purged))
}
