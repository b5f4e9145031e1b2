use sqlx::{Postgres, Transaction, postgres::PgQueryResult};

use super::*;

pub struct PollTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PollTransaction {

    pub async fn new(db: &PgPool) -> Result<PollTransaction, sqlx::Error> {
        Ok(PollTransaction {
            tx: db.begin().await?
        })
    }

    pub async fn select_polls_by_status(&mut self, status: PollStatus) -> Result<Vec<PollRow>, sqlx::Error> {
        sqlx::query_as::<_, PollRow>(
            "select id, question, channel_id, message_id, multiple_choice, created_at, end_time, status \
            from poll where status = $1 order by id",
        ).bind(status.as_str())
        .fetch_all(&mut *self.tx)
        .await
    }

    pub async fn upsert_poll(&mut self, poll: &PollRow) -> Result<PgQueryResult, sqlx::Error> {
        sqlx::query(
            "insert \
                into poll(id, question, channel_id, message_id, multiple_choice, created_at, end_time, status) \
                values ($1, $2, $3, $4, $5, $6, $7, $8) \
                on conflict (id) do update set message_id = excluded.message_id, status = excluded.status"
        ).bind(poll.id)
        .bind(&poll.question)
        .bind(&poll.channel_id)
        .bind(&poll.message_id)
        .bind(poll.multiple_choice)
        .bind(poll.created_at)
        .bind(poll.end_time)
        .bind(&poll.status)
        .execute(&mut *self.tx)
        .await
    }

    pub async fn select_status(&mut self, poll_id: i64) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("select status from poll where id = $1")
        .bind(poll_id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    pub async fn update_status(&mut self, poll_id: i64, status: PollStatus)
    -> Result<PgQueryResult, sqlx::Error> {
        sqlx::query("update poll set status = $1 where id = $2")
        .bind(status.as_str())
        .bind(poll_id)
        .execute(&mut *self.tx)
        .await
    }

    pub async fn delete_poll(&mut self, poll_id: i64) -> Result<PgQueryResult, sqlx::Error> {
        sqlx::query("delete from poll where id = $1")
        .bind(poll_id)
        .execute(&mut *self.tx)
        .await
    }

    pub async fn delete_ended_before(&mut self, before: Timestamp) -> Result<PgQueryResult, sqlx::Error> {
        sqlx::query("delete from poll where status = $1 and end_time < $2")
        .bind(PollStatus::Ended.as_str())
        .bind(before)
        .execute(&mut *self.tx)
        .await
    }

    pub async fn select_options(&mut self, poll_ids: &[i64])
    -> Result<Vec<OptionRow>, sqlx::Error> {
        sqlx::query_as::<_, OptionRow>(
            "select poll_id, position, glyph, label from poll_option where poll_id = any($1)"
        ).bind(poll_ids)
        .fetch_all(&mut *self.tx)
        .await
    }

    pub async fn insert_option(&mut self, poll_id: i64, position: i32, option: &PollOption)
    -> Result<PgQueryResult, sqlx::Error>{
        sqlx::query(
            "insert into poll_option(poll_id, position, glyph, label) values ($1, $2, $3, $4) \
            on conflict do nothing"
        ).bind(poll_id)
        .bind(position)
        .bind(&option.glyph)
        .bind(&option.label)
        .execute(&mut *self.tx)
        .await
    }

    pub async fn select_votes(&mut self, poll_ids: &[i64]) -> Result<Vec<VoteRow>, sqlx::Error> {
        sqlx::query_as(
            "select poll_id, user_id, option_index, seq from vote where poll_id = any($1) \
            order by poll_id, seq, option_index"
        ).bind(poll_ids)
        .fetch_all(&mut *self.tx)
        .await
    }

    pub async fn delete_votes(&mut self, poll_id: i64)
    -> Result<PgQueryResult, sqlx::Error> {
        sqlx::query(
            "delete from vote where poll_id = $1"
        ).bind(poll_id)
        .execute(&mut *self.tx)
        .await
    }

    pub async fn insert_vote(&mut self, vote: &VoteRow)
    -> Result<PgQueryResult, sqlx::Error>{
        sqlx::query(
            "insert into vote(poll_id, user_id, option_index, seq)
                values ($1, $2, $3, $4)"
            ).bind(vote.poll_id)
            .bind(&vote.user_id)
            .bind(vote.option_index)
            .bind(vote.seq)
            .execute(&mut *self.tx)
            .await
    }

    pub async fn commit(self)-> Result<(), sqlx::Error> {
        self.tx.commit().await
    }
}
