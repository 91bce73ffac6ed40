//! The five server-side scripts this engine relies on, loaded once per pool via
//! `SCRIPT LOAD` and invoked thereafter by SHA1, with inline `EVAL` as the fallback
//! when the server reports `NOSCRIPT` (grounded on the teacher's own
//! `Script::new().key().arg().invoke_async()` pattern in `util/string.rs`, generalized
//! into pipeline-embeddable command building here and in [`crate::transaction`]).

use redis::aio::ConnectionLike;
use redis::Cmd;

use crate::error::Result;

const DELETE_MODELS_BY_SET_IDS: &str = include_str!("lua/delete_models_by_set_ids.lua");
const DELETE_STRING_INDEX: &str = include_str!("lua/delete_string_index.lua");
const EXTRACT_IDS_FROM_FIELD_INDEX: &str = include_str!("lua/extract_ids_from_field_index.lua");
const EXTRACT_IDS_FROM_STRING_INDEX: &str = include_str!("lua/extract_ids_from_string_index.lua");
const FIND_MODELS_BY_IDS: &str = include_str!("lua/find_models_by_ids.lua");

/// One compiled script: its fixed key-count, source (kept around for the `NOSCRIPT`
/// fallback), and the SHA1 digest returned by `SCRIPT LOAD`.
#[derive(Debug, Clone)]
pub struct ScriptDef {
    pub name: &'static str,
    pub key_count: u8,
    source: &'static str,
    sha: String,
}

impl ScriptDef {
    pub fn sha(&self) -> &str {
        &self.sha
    }

    pub(crate) fn source(&self) -> &str {
        self.source
    }

    /// Build an `EVALSHA` command over the given keys and arguments.
    pub fn evalsha_cmd(&self, keys: &[Vec<u8>], args: &[Vec<u8>]) -> Cmd {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(&self.sha).arg(self.key_count as i64);
        for key in keys {
            cmd.arg(key);
        }
        for arg in args {
            cmd.arg(arg);
        }
        cmd
    }

    /// Build an inline `EVAL` command, used when the server has forgotten the script
    /// (a `NOSCRIPT` reply, typically after a `SCRIPT FLUSH` or server restart).
    pub fn eval_cmd(&self, keys: &[Vec<u8>], args: &[Vec<u8>]) -> Cmd {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(self.source).arg(self.key_count as i64);
        for key in keys {
            cmd.arg(key);
        }
        for arg in args {
            cmd.arg(arg);
        }
        cmd
    }
}

/// All five scripts, loaded together at pool construction.
#[derive(Debug, Clone)]
pub struct ScriptLibrary {
    pub delete_models_by_set_ids: ScriptDef,
    pub delete_string_index: ScriptDef,
    pub extract_ids_from_field_index: ScriptDef,
    pub extract_ids_from_string_index: ScriptDef,
    pub find_models_by_ids: ScriptDef,
}

impl ScriptLibrary {
    pub async fn load<C: ConnectionLike + Send>(conn: &mut C) -> Result<Self> {
        Ok(ScriptLibrary {
            delete_models_by_set_ids: load_one(
                conn,
                "deleteModelsBySetIds",
                1,
                DELETE_MODELS_BY_SET_IDS,
            )
            .await?,
            delete_string_index: load_one(conn, "deleteStringIndex", 2, DELETE_STRING_INDEX)
                .await?,
            extract_ids_from_field_index: load_one(
                conn,
                "extractIdsFromFieldIndex",
                2,
                EXTRACT_IDS_FROM_FIELD_INDEX,
            )
            .await?,
            extract_ids_from_string_index: load_one(
                conn,
                "extractIdsFromStringIndex",
                2,
                EXTRACT_IDS_FROM_STRING_INDEX,
            )
            .await?,
            find_models_by_ids: load_one(conn, "findModelsByIds", 1, FIND_MODELS_BY_IDS).await?,
        })
    }
}

async fn load_one<C: ConnectionLike + Send>(
    conn: &mut C,
    name: &'static str,
    key_count: u8,
    source: &'static str,
) -> Result<ScriptDef> {
    let sha: String = redis::cmd("SCRIPT")
        .arg("LOAD")
        .arg(source)
        .query_async(conn)
        .await?;
    Ok(ScriptDef {
        name,
        key_count,
        source,
        sha,
    })
}
