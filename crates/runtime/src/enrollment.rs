use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

/// The entitlement row: its existence grants a student access to a course.
/// Created by checkout, deleted by refund approval.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Enrollment {
    pub id: Uuid,
    pub course_id: Uuid,
    pub student_id: Uuid,
    pub progress: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Enrollment {
    /// Idempotent insert: the unique (course_id, student_id) key makes a
    /// concurrent double-enroll collapse into one row.
    pub async fn insert_ignore(
        conn: &mut PgConnection,
        course_id: Uuid,
        student_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO "enrollments" ("course_id", "student_id", "progress")
               VALUES ($1, $2, 0)
               ON CONFLICT ("course_id", "student_id") DO NOTHING"#,
        )
        .bind(course_id)
        .bind(student_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Course ids, out of the given set, the student is already enrolled in.
    pub async fn enrolled_subset(
        conn: &mut PgConnection,
        student_id: Uuid,
        course_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"SELECT "course_id" FROM "enrollments"
               WHERE "student_id" = $1 AND "course_id" = ANY($2)"#,
        )
        .bind(student_id)
        .bind(course_ids)
        .fetch_all(conn)
        .await
    }

    pub async fn exists(
        conn: &mut PgConnection,
        student_id: Uuid,
        course_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"SELECT 1::BIGINT FROM "enrollments" WHERE "student_id" = $1 AND "course_id" = $2"#,
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(conn)
        .await?;
        Ok(found.is_some())
    }

    /// Revokes access for the given courses, returning how many rows went.
    pub async fn delete_for_courses(
        conn: &mut PgConnection,
        student_id: Uuid,
        course_ids: &[Uuid],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"DELETE FROM "enrollments" WHERE "student_id" = $1 AND "course_id" = ANY($2)"#,
        )
        .bind(student_id)
        .bind(course_ids)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }
}
