use actix_web::web::{self, ServiceConfig};

use crate::operations::PollOperationsT;

pub mod paths;

use paths::*;

pub fn config<A: 'static + PollOperationsT>(cfg: &mut ServiceConfig) {
    cfg.route(POLLS_PATH, web::post().to(post_poll_handler::<A>))
        .route(POLLS_PATH, web::get().to(get_polls_handler::<A>))
        .route(PURGE_PATH, web::post().to(purge_handler::<A>))
        .route(POLL_PATH, web::delete().to(delete_poll_handler::<A>))
        .route(CLOSE_PATH, web::post().to(close_poll_handler::<A>))
        .route(VOTES_PATH, web::post().to(post_vote_handler::<A>))
    ;
}
