//! Application callbacks.

use vigil_core::{ChannelInfo, ClientId, Parameter};

use crate::client::ClientChannel;

/// Hooks through which the application observes clients and serves
/// parameters. Every method has a no-op default.
///
/// Subscribe and unsubscribe notifications are delivered from a dedicated
/// task in the order they happened. The remaining hooks run on the calling
/// client's reader task and should return quickly.
///
/// Parameter and connection graph interest hooks run while the server holds
/// the matching interest counter, so for any one name they arrive in the
/// order the counter changed. They must not subscribe or unsubscribe
/// clients themselves.
pub trait ServerListener: Send + Sync + 'static {
    /// A client subscribed to a server channel.
    fn on_subscribe(&self, _client: ClientId, _channel: &ChannelInfo) {}

    /// A client unsubscribed from a server channel, or disconnected while subscribed.
    fn on_unsubscribe(&self, _client: ClientId, _channel: &ChannelInfo) {}

    /// A client advertised a channel it will publish on.
    fn on_client_advertise(&self, _client: ClientId, _channel: &ClientChannel) {}

    /// A client withdrew one of its channels, or disconnected.
    fn on_client_unadvertise(&self, _client: ClientId, _channel: &ClientChannel) {}

    /// A client published a message on one of its channels.
    fn on_message_data(&self, _client: ClientId, _channel: &ClientChannel, _payload: &[u8]) {}

    /// Read parameters. An empty `names` asks for all of them.
    fn on_get_parameters(
        &self,
        _client: ClientId,
        _names: &[String],
        _request_id: Option<&str>,
    ) -> Vec<Parameter> {
        Vec::new()
    }

    /// Apply parameter writes and return the resulting values. A parameter
    /// without a value is a deletion.
    fn on_set_parameters(
        &self,
        _client: ClientId,
        parameters: Vec<Parameter>,
        _request_id: Option<&str>,
    ) -> Vec<Parameter> {
        parameters
    }

    /// The first client became interested in these parameters.
    fn on_parameters_subscribe(&self, _names: &[String]) {}

    /// The last interested client unsubscribed from these parameters.
    fn on_parameters_unsubscribe(&self, _names: &[String]) {}

    /// The first client subscribed to connection graph updates.
    fn on_connection_graph_subscribe(&self) {}

    /// The last client unsubscribed from connection graph updates.
    fn on_connection_graph_unsubscribe(&self) {}
}
