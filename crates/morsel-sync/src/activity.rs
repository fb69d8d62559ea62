use tracing::debug;

use morsel_types::models::{FoodRequest, Notification, RequestStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ToastVariant {
    #[default]
    Default,
    Success,
    Destructive,
}

/// Where a toast action takes the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeepLink {
    Conversation(String),
}

impl DeepLink {
    pub fn path(&self) -> String {
        match self {
            Self::Conversation(id) => format!("/messages/{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub description: String,
    pub variant: ToastVariant,
    pub action: Option<DeepLink>,
}

/// Request badges and the notification list.
#[derive(Debug, Default)]
pub struct ActivityReconciler {
    /// Pending requests on the local user's posts
    pending_requests: u32,
    /// The local user's own requests with an update not yet looked at
    unviewed_requests: u32,
    notifications: Vec<Notification>,
    unread_notifications: u32,
}

impl ActivityReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial badge values. A failed fetch seeds zero.
    pub fn seed_counts(&mut self, pending: Option<u32>, unviewed: Option<u32>) {
        self.pending_requests = pending.unwrap_or(0);
        self.unviewed_requests = unviewed.unwrap_or(0);
    }

    pub fn pending_requests(&self) -> u32 {
        self.pending_requests
    }

    pub fn unviewed_requests(&self) -> u32 {
        self.unviewed_requests
    }

    pub fn on_request_created(&mut self, request: &FoodRequest) {
        self.pending_requests = self.pending_requests.saturating_add(1);
        debug!(request_id = %request.id, pending = self.pending_requests, "Request created");
    }

    /// A request changed status. `conversation_id` is the already resolved
    /// conversation of an accepted request.
    pub fn on_request_updated(
        &mut self,
        request: &FoodRequest,
        conversation_id: Option<&str>,
    ) -> Option<Toast> {
        self.pending_requests = self.pending_requests.saturating_sub(1);
        debug!(
            request_id = %request.id,
            status = ?request.status,
            pending = self.pending_requests,
            "Request updated"
        );

        let food = request.food_title.as_deref().unwrap_or("your food");
        match request.status {
            RequestStatus::Accepted => {
                self.unviewed_requests = self.unviewed_requests.saturating_add(1);
                Some(Toast {
                    title: "Request accepted!".to_string(),
                    description: format!(
                        "Your request for {food} was accepted. Say hi to arrange pickup."
                    ),
                    variant: ToastVariant::Success,
                    action: conversation_id.map(|id| DeepLink::Conversation(id.to_string())),
                })
            }
            RequestStatus::Rejected => Some(Toast {
                title: "Request declined".to_string(),
                description: format!("Your request for {food} was declined."),
                variant: ToastVariant::Default,
                action: None,
            }),
            RequestStatus::Pending => None,
        }
    }

    /// Visiting "My Requests" clears its badge.
    pub fn visit_my_requests(&mut self) {
        self.unviewed_requests = 0;
    }

    pub fn load_notifications(&mut self, notifications: Vec<Notification>) {
        self.notifications = notifications;
        self.recount();
    }

    /// Add a pushed notification. Ignored if the id is already listed.
    pub fn on_notification(&mut self, notification: Notification) -> bool {
        if self.notifications.iter().any(|n| n.id == notification.id) {
            return false;
        }
        self.notifications.push(notification);
        self.recount();
        true
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        let found = match self.notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.is_read = true;
                true
            }
            None => false,
        };
        self.recount();
        found
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn unread_notifications(&self) -> u32 {
        self.unread_notifications
    }

    fn recount(&mut self) {
        self.unread_notifications = self.notifications.iter().filter(|n| !n.is_read).count() as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request(status: RequestStatus, nested: Option<&str>) -> FoodRequest {
        FoodRequest {
            id: "r1".into(),
            food_post_id: "f1".into(),
            user_id: "me".into(),
            user_name: None,
            food_title: Some("Lentil soup".into()),
            status,
            request_date: None,
            conversation_id: nested.map(str::to_string),
        }
    }

    fn notification(id: &str, is_read: bool) -> Notification {
        Notification {
            id: id.into(),
            title: "Heads up".into(),
            message: "something happened".into(),
            kind: "info".into(),
            reference_id: None,
            is_read,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_counters_never_go_negative() {
        let mut activity = ActivityReconciler::new();
        activity.seed_counts(None, None);

        for _ in 0..3 {
            activity.on_request_updated(&request(RequestStatus::Rejected, None), None);
        }
        assert_eq!(activity.pending_requests(), 0);

        activity.on_request_created(&request(RequestStatus::Pending, None));
        activity.on_request_created(&request(RequestStatus::Pending, None));
        activity.on_request_updated(&request(RequestStatus::Pending, None), None);
        assert_eq!(activity.pending_requests(), 1);
    }

    #[test]
    fn test_accepted_toast_links_conversation() {
        let mut activity = ActivityReconciler::new();
        activity.seed_counts(Some(1), Some(0));

        let toast = activity
            .on_request_updated(&request(RequestStatus::Accepted, Some("c7")), Some("c7"))
            .unwrap();
        assert_eq!(toast.variant, ToastVariant::Success);
        assert_eq!(toast.action, Some(DeepLink::Conversation("c7".into())));
        assert_eq!(toast.action.unwrap().path(), "/messages/c7");
        assert!(toast.description.contains("Lentil soup"));

        assert_eq!(activity.pending_requests(), 0);
        assert_eq!(activity.unviewed_requests(), 1);

        activity.visit_my_requests();
        assert_eq!(activity.unviewed_requests(), 0);
    }

    #[test]
    fn test_rejected_toast_is_plain() {
        let mut activity = ActivityReconciler::new();
        let toast = activity
            .on_request_updated(&request(RequestStatus::Rejected, None), None)
            .unwrap();
        assert_eq!(toast.variant, ToastVariant::Default);
        assert!(toast.action.is_none());
        assert_eq!(activity.unviewed_requests(), 0);
    }

    #[test]
    fn test_unread_recomputed_from_list() {
        let mut activity = ActivityReconciler::new();
        activity.load_notifications(vec![notification("n1", false), notification("n2", true)]);
        assert_eq!(activity.unread_notifications(), 1);

        assert!(activity.on_notification(notification("n3", false)));
        assert!(!activity.on_notification(notification("n3", false)));
        assert_eq!(activity.unread_notifications(), 2);

        assert!(activity.mark_read("n1"));
        assert!(activity.mark_read("n1"));
        assert!(!activity.mark_read("missing"));
        assert_eq!(activity.unread_notifications(), 1);
        assert_eq!(activity.notifications().len(), 3);
    }
}
