/// Local notification cue for messages that arrive while the chat screen is
/// not focused (a sound, a badge, a banner).
///
/// Fire-and-forget: implementations own their failure handling and must not
/// propagate errors — a failed cue never aborts the message write.
pub trait Notifier: Send + Sync {
    fn message_received(&self, conversation_id: &str, sender_id: &str, text: &str);
}

/// Default sink that does nothing.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn message_received(&self, _conversation_id: &str, _sender_id: &str, _text: &str) {}
}
