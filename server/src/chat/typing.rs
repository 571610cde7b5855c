//! Typing indicator. One flag per participant stored on the thread row,
//! last write wins, cleared explicitly by the client.

use crate::auth::Caller;
use crate::chat::ChatService;
use crate::error::ChatError;
use crate::ws::ChatEvent;

impl ChatService {
    pub async fn set_typing(
        &self,
        caller: &Caller,
        thread_id: &str,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        let thread = self.load_thread_for(caller, thread_id).await?;
        let slot = thread.slot_of(&caller.user_id).ok_or(ChatError::Forbidden)?;

        self.store.set_typing(&thread.id, slot, is_typing).await?;

        // Only the other side cares
        self.registry.broadcast_to_user(
            thread.other_participant(&caller.user_id),
            &ChatEvent::TypingStatus {
                thread_id: thread.id.clone(),
                user_id: caller.user_id.clone(),
                is_typing,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::test_support::{drain, service};

    #[tokio::test]
    async fn test_typing_reaches_only_the_other_participant() {
        let (service, registry) = service();
        let alice = Caller::new("alice", "seeker");
        let (thread, _, _) = service.start_thread(&alice, "bob", None, "hi").await.unwrap();

        let (_a, mut alice_rx) = registry.register("alice");
        let (_b1, mut bob_phone) = registry.register("bob");
        let (_b2, mut bob_laptop) = registry.register("bob");

        service.set_typing(&alice, &thread.id, true).await.unwrap();

        for rx in [&mut bob_phone, &mut bob_laptop] {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            assert_eq!(events[0]["type"], "TYPING_STATUS");
            assert_eq!(events[0]["user_id"], "alice");
            assert_eq!(events[0]["is_typing"], true);
            assert_eq!(events[0]["thread_id"], thread.id.as_str());
        }
        assert!(drain(&mut alice_rx).is_empty());

        let stored = service.store().get_thread(&thread.id).await.unwrap().unwrap();
        assert!(stored.typing_a);
        assert!(!stored.typing_b);
    }

    #[tokio::test]
    async fn test_typing_last_write_wins() {
        let (service, _registry) = service();
        let bob = Caller::new("bob", "owner");
        let (thread, _, _) = service.start_thread(&bob, "alice", None, "hi").await.unwrap();

        service.set_typing(&bob, &thread.id, true).await.unwrap();
        service.set_typing(&bob, &thread.id, false).await.unwrap();

        let stored = service.store().get_thread(&thread.id).await.unwrap().unwrap();
        assert!(!stored.typing_b);
    }

    #[tokio::test]
    async fn test_typing_requires_participant() {
        let (service, _registry) = service();
        let alice = Caller::new("alice", "seeker");
        let (thread, _, _) = service.start_thread(&alice, "bob", None, "hi").await.unwrap();

        let mallory = Caller::new("mallory", "seeker");
        assert!(matches!(
            service.set_typing(&mallory, &thread.id, true).await,
            Err(ChatError::Forbidden)
        ));
    }
}
