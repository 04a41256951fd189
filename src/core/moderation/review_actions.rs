// Review action sets.
//
// Each target handler assembles one of these for the review queue. The queue
// renders the bundles and calls back into `Bouncer::resolve` with the chosen
// action.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Actions a reviewer can take on an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    ConfirmSpam,
    ConfirmSuspend,
    NotSpam,
    Ignore,
    DeleteUser,
    DeleteUserBlock,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::ConfirmSpam => "confirm_spam",
            ReviewAction::ConfirmSuspend => "confirm_suspend",
            ReviewAction::NotSpam => "not_spam",
            ReviewAction::Ignore => "ignore",
            ReviewAction::DeleteUser => "delete_user",
            ReviewAction::DeleteUserBlock => "delete_user_block",
        }
    }

    /// Every action that agrees the content is spam.
    pub fn confirms_spam(&self) -> bool {
        matches!(
            self,
            ReviewAction::ConfirmSpam
                | ReviewAction::ConfirmSuspend
                | ReviewAction::DeleteUser
                | ReviewAction::DeleteUserBlock
        )
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirm_spam" => Ok(ReviewAction::ConfirmSpam),
            "confirm_suspend" => Ok(ReviewAction::ConfirmSuspend),
            "not_spam" => Ok(ReviewAction::NotSpam),
            "ignore" => Ok(ReviewAction::Ignore),
            "delete_user" => Ok(ReviewAction::DeleteUser),
            "delete_user_block" => Ok(ReviewAction::DeleteUserBlock),
            other => Err(format!("unknown review action: {}", other)),
        }
    }
}

/// What the reviewer looking at the queue is allowed to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewerCapabilities {
    pub is_staff: bool,
    pub can_delete_user: bool,
    pub can_suspend: bool,
}

impl ReviewerCapabilities {
    /// An admin: every action is on the table.
    pub const FULL: ReviewerCapabilities = ReviewerCapabilities {
        is_staff: true,
        can_delete_user: true,
        can_suspend: true,
    };
}

/// One button in the review UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action: ReviewAction,
    pub icon: String,
    pub label: String,
    /// Client-side action to run instead of a plain request (e.g. "suspend")
    pub client_action: Option<String>,
    pub confirm: bool,
    pub has_description: bool,
}

impl ActionSpec {
    pub fn new(action: ReviewAction, icon: &str) -> Self {
        Self {
            action,
            icon: icon.to_string(),
            label: format!("bouncer.actions.{}", action),
            client_action: None,
            confirm: false,
            has_description: false,
        }
    }

    pub fn client_action(mut self, client_action: &str) -> Self {
        self.client_action = Some(client_action.to_string());
        self
    }

    pub fn confirm(mut self) -> Self {
        self.confirm = true;
        self
    }

    pub fn described(mut self) -> Self {
        self.has_description = true;
        self
    }
}

/// A dropdown group of related actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionBundle {
    pub id: String,
    pub icon: String,
    pub label: String,
    pub actions: Vec<ActionSpec>,
}

impl ActionBundle {
    pub fn add(&mut self, spec: ActionSpec) -> &mut Self {
        self.actions.push(spec);
        self
    }
}

/// Ordered collection of bundles shown for one escalation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSet {
    pub bundles: Vec<ActionBundle>,
}

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new bundle and return it for filling.
    pub fn bundle(&mut self, id: &str, icon: &str, label: &str) -> &mut ActionBundle {
        self.bundles.push(ActionBundle {
            id: id.to_string(),
            icon: icon.to_string(),
            label: label.to_string(),
            actions: Vec::new(),
        });
        let last = self.bundles.len() - 1;
        &mut self.bundles[last]
    }

    /// Single-action bundle, named after its action.
    pub fn single(&mut self, spec: ActionSpec) -> &mut Self {
        let id = spec.action.to_string();
        let icon = spec.icon.clone();
        let label = spec.label.clone();
        self.bundle(&id, &icon, &label).add(spec);
        self
    }

    pub fn has(&self, action: ReviewAction) -> bool {
        self.actions().any(|spec| spec.action == action)
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionSpec> {
        self.bundles.iter().flat_map(|b| b.actions.iter())
    }
}

/// Agree/disagree layout shared by post and comment escalations.
pub fn content_actions(caps: &ReviewerCapabilities) -> ActionSet {
    let mut set = ActionSet::new();

    let agree = set.bundle("agree", "thumbs-up", "reviewables.actions.agree.title");
    agree.add(ActionSpec::new(ReviewAction::ConfirmSpam, "trash-can").described());
    if caps.can_suspend {
        agree.add(
            ActionSpec::new(ReviewAction::ConfirmSuspend, "ban")
                .client_action("suspend")
                .described(),
        );
    }
    if caps.can_delete_user {
        agree.add(ActionSpec::new(ReviewAction::DeleteUser, "user-xmark").confirm());
        agree.add(ActionSpec::new(ReviewAction::DeleteUserBlock, "ban").confirm());
    }

    set.bundle(
        "disagree",
        "thumbs-down",
        "reviewables.actions.disagree_bundle.title",
    )
    .add(ActionSpec::new(ReviewAction::NotSpam, "thumbs-down").described())
    .add(ActionSpec::new(ReviewAction::Ignore, "xmark").described());

    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_actions_without_privileges() {
        let set = content_actions(&ReviewerCapabilities::default());

        assert_eq!(set.bundles.len(), 2);
        assert!(set.has(ReviewAction::ConfirmSpam));
        assert!(set.has(ReviewAction::NotSpam));
        assert!(set.has(ReviewAction::Ignore));
        assert!(!set.has(ReviewAction::ConfirmSuspend));
        assert!(!set.has(ReviewAction::DeleteUser));
    }

    #[test]
    fn test_content_actions_with_privileges() {
        let caps = ReviewerCapabilities {
            is_staff: true,
            can_delete_user: true,
            can_suspend: true,
        };
        let set = content_actions(&caps);

        let agree = &set.bundles[0];
        assert_eq!(agree.id, "agree");
        assert_eq!(agree.actions.len(), 4);
        let suspend = agree
            .actions
            .iter()
            .find(|a| a.action == ReviewAction::ConfirmSuspend)
            .unwrap();
        assert_eq!(suspend.client_action.as_deref(), Some("suspend"));
    }

    #[test]
    fn test_single_bundles() {
        let mut set = ActionSet::new();
        set.single(ActionSpec::new(ReviewAction::NotSpam, "thumbs-up"));

        assert_eq!(set.bundles[0].id, "not_spam");
        assert_eq!(set.bundles[0].actions[0].label, "bouncer.actions.not_spam");
    }

    #[test]
    fn test_confirms_spam() {
        assert!(ReviewAction::DeleteUserBlock.confirms_spam());
        assert!(!ReviewAction::Ignore.confirms_spam());
        assert_eq!("not_spam".parse::<ReviewAction>(), Ok(ReviewAction::NotSpam));
    }
}
