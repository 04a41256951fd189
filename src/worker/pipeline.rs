// The three bouncers plus the loaders the worker needs to feed them.

use crate::core::moderation::{
    BouncerDeps, CommentTarget, CommentsBouncer, PostTarget, PostsBouncer, TargetSource,
    UserTarget, UsersBouncer,
};
use std::sync::Arc;

pub struct Pipeline {
    pub deps: BouncerDeps,
    pub posts: PostsBouncer,
    pub users: UsersBouncer,
    pub comments: CommentsBouncer,
    pub post_source: Arc<dyn TargetSource<PostTarget>>,
    pub user_source: Arc<dyn TargetSource<UserTarget>>,
    pub comment_source: Arc<dyn TargetSource<CommentTarget>>,
}

impl Pipeline {
    pub fn new(
        deps: BouncerDeps,
        post_source: Arc<dyn TargetSource<PostTarget>>,
        user_source: Arc<dyn TargetSource<UserTarget>>,
        comment_source: Arc<dyn TargetSource<CommentTarget>>,
    ) -> Self {
        Self {
            posts: PostsBouncer::for_posts(deps.clone()),
            users: UsersBouncer::for_users(deps.clone()),
            comments: CommentsBouncer::for_comments(deps.clone()),
            deps,
            post_source,
            user_source,
            comment_source,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::core::moderation::test_support::Harness;
    use crate::infra::moderation::SqliteHostStore;
    use tempfile::{tempdir, TempDir};

    /// Pipeline over a real SQLite host store and a stubbed provider.
    pub async fn sqlite_pipeline() -> (Pipeline, Arc<SqliteHostStore>, Harness, TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.db");
        let store = Arc::new(SqliteHostStore::new(path.to_str().unwrap()).await.unwrap());

        let harness = Harness::new();
        let mut deps = harness.deps();
        deps.fields = store.clone();
        deps.escalations = store.clone();
        deps.content = store.clone();

        let pipeline = Pipeline::new(deps, store.clone(), store.clone(), store.clone());
        (pipeline, store, harness, dir)
    }

    /// Save a post together with its author and topic so the loaders find it.
    pub async fn seed_post(store: &SqliteHostStore, post: &PostTarget) {
        store
            .save_user(&UserTarget {
                user: post.author.clone(),
                bio_raw: None,
                last_ip: None,
                last_user_agent: None,
                deleted: false,
            })
            .await
            .unwrap();
        if let Some(topic) = &post.topic {
            store.save_topic(topic).await.unwrap();
        }
        store.save_post(post).await.unwrap();
    }
}
