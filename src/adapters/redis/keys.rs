/// Centralizes the `{namespace}:...` key-formatting rules so every
/// component builds Redis keys the same way. The shapes here are
/// bit-exact with the documented key schema; changing any of them would
/// break interoperability between engines sharing one Redis.
#[derive(Debug, Clone)]
pub struct Keys {
    namespace: String,
}

impl Keys {
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into() }
    }

    #[must_use]
    pub fn client(&self, cid: &str) -> String {
        format!("{}:clients:{cid}", self.namespace)
    }

    #[must_use]
    pub fn client_index(&self) -> String {
        format!("{}:clients:index", self.namespace)
    }

    #[must_use]
    pub fn client_scan_pattern(&self) -> String {
        format!("{}:clients:*", self.namespace)
    }

    #[must_use]
    pub fn subscriptions(&self, cid: &str) -> String {
        format!("{}:subscriptions:{cid}", self.namespace)
    }

    #[must_use]
    pub fn subscriptions_scan_pattern(&self) -> String {
        format!("{}:subscriptions:*", self.namespace)
    }

    #[must_use]
    pub fn channel(&self, channel: &str) -> String {
        format!("{}:channels:{channel}", self.namespace)
    }

    #[must_use]
    pub fn channels_scan_pattern(&self) -> String {
        format!("{}:channels:*", self.namespace)
    }

    #[must_use]
    pub fn subscription_meta(&self, cid: &str, channel: &str) -> String {
        format!("{}:subscription:{cid}:{channel}", self.namespace)
    }

    #[must_use]
    pub fn patterns(&self) -> String {
        format!("{}:patterns", self.namespace)
    }

    #[must_use]
    pub fn messages(&self, cid: &str) -> String {
        format!("{}:messages:{cid}", self.namespace)
    }

    #[must_use]
    pub fn messages_scan_pattern(&self) -> String {
        format!("{}:messages:*", self.namespace)
    }

    /// The cid a `messages:{cid}` or `subscriptions:{cid}` scan hit
    /// belongs to — the trailing path segment after the last `:`.
    #[must_use]
    pub fn id_from_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.rsplit(':').next()
    }

    #[must_use]
    pub fn publish_channel(&self, channel: &str) -> String {
        format!("{}:publish:{channel}", self.namespace)
    }

    #[must_use]
    pub fn publish_pattern(&self) -> String {
        format!("{}:publish:*", self.namespace)
    }

    /// Strips the `{namespace}:publish:` prefix a pub/sub receive observed
    /// on the wire, recovering the logical channel name.
    #[must_use]
    pub fn channel_from_publish_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&format!("{}:publish:", self.namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_bit_exact_key_shapes() {
        let keys = Keys::new("faye");
        assert_eq!(keys.client("c1"), "faye:clients:c1");
        assert_eq!(keys.client_index(), "faye:clients:index");
        assert_eq!(keys.subscriptions("c1"), "faye:subscriptions:c1");
        assert_eq!(keys.channel("/a/b"), "faye:channels:/a/b");
        assert_eq!(keys.subscription_meta("c1", "/a/b"), "faye:subscription:c1:/a/b");
        assert_eq!(keys.patterns(), "faye:patterns");
        assert_eq!(keys.messages("c1"), "faye:messages:c1");
        assert_eq!(keys.publish_channel("/a/b"), "faye:publish:/a/b");
        assert_eq!(keys.publish_pattern(), "faye:publish:*");
    }

    #[test]
    fn recovers_channel_from_publish_key() {
        let keys = Keys::new("faye");
        assert_eq!(keys.channel_from_publish_key("faye:publish:/a/b"), Some("/a/b"));
        assert_eq!(keys.channel_from_publish_key("other:publish:/a/b"), None);
    }

    #[test]
    fn recovers_id_from_scan_key() {
        let keys = Keys::new("faye");
        assert_eq!(keys.id_from_key("faye:messages:c1"), Some("c1"));
    }
}
