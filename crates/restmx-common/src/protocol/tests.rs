//! Tests for the protocol module
//!
//! These tests cover resource name parsing, the wire names of the bootstrap
//! and notification payloads, and remote exception classification.

#[cfg(test)]
mod tests {
    use super::super::*;
    use serde_json::json;

    // ============================================================================
    // ObjectName Tests
    // ============================================================================

    #[test]
    fn test_object_name_parts() {
        let name = ObjectName::new("app:type=Cache,name=users").unwrap();
        assert_eq!(name.domain(), "app");
        assert_eq!(name.key_property("type"), Some("Cache"));
        assert_eq!(name.key_property("name"), Some("users"));
        assert_eq!(name.key_property("missing"), None);
        assert!(!name.is_pattern());
    }

    #[test]
    fn test_object_name_patterns() {
        assert!(ObjectName::new("app:*").unwrap().is_pattern());
        assert!(ObjectName::new("app:type=Cache,*").unwrap().is_pattern());
        assert!(ObjectName::new("a?p:type=Cache").unwrap().is_pattern());
    }

    #[test]
    fn test_object_name_rejects_malformed() {
        assert!(ObjectName::new("no-domain").is_err());
        assert!(ObjectName::new("app:").is_err());
        assert!(ObjectName::new("app:type").is_err());
        assert!(ObjectName::new("app:=x").is_err());
    }

    #[test]
    fn test_object_name_serde_is_plain_string() {
        let name = ObjectName::new("app:type=Cache").unwrap();
        assert_eq!(serde_json::to_value(&name).unwrap(), json!("app:type=Cache"));

        let bad: std::result::Result<ObjectName, _> = serde_json::from_value(json!("garbage"));
        assert!(bad.is_err());
    }

    // ============================================================================
    // Payload Shape Tests
    // ============================================================================

    #[test]
    fn test_server_info_wire_names() {
        let info: ServerInfo = serde_json::from_value(json!({
            "version": 4,
            "mbeans": "/IBMJMXConnectorREST/mbeans",
            "createMBean": "/IBMJMXConnectorREST/mbeans/factory",
            "mbeanCount": "/IBMJMXConnectorREST/mbeanServer/mbeanCount",
            "defaultDomain": "/IBMJMXConnectorREST/mbeanServer/defaultDomain",
            "domains": "/IBMJMXConnectorREST/mbeanServer/domains",
            "notifications": "/IBMJMXConnectorREST/notifications",
            "instanceOf": "/IBMJMXConnectorREST/mbeanServer/instanceOf"
        }))
        .unwrap();

        assert_eq!(info.version, 4);
        assert_eq!(info.notifications_url, "/IBMJMXConnectorREST/notifications");
        assert!(info.file_transfer_url.is_none());
    }

    #[test]
    fn test_default_layout_paths_live_under_connector() {
        let info = ServerInfo::with_default_layout(3);
        for url in [&info.mbeans_url, &info.domains_url, &info.notifications_url] {
            assert!(url.starts_with(CONNECTOR_URI), "{} outside connector", url);
        }
    }

    #[test]
    fn test_record_routing_levels() {
        let plain = NotificationRecord::new(Notification::new("t", "app:type=A", 1));
        assert!(plain.routing().is_none());

        let host = RoutingContext::host("h1");
        let routed = plain.clone().with_routing(&host);
        assert_eq!(routed.routing(), Some(host));

        let server = RoutingContext::server("h1", "/wlp/usr", "member1");
        let routed = plain.with_routing(&server);
        assert_eq!(routed.routing(), Some(server));
    }

    #[test]
    fn test_server_registration_wire_names() {
        let registration = ServerNotificationRegistration {
            operation: ServerRegistrationOp::Add,
            object_name: ObjectName::new("app:type=A").unwrap(),
            listener: ObjectName::new("app:type=L").unwrap(),
            filter: None,
            filter_id: 3,
            handback_id: 0,
            routing: None,
        };
        let value = serde_json::to_value(&registration).unwrap();
        assert_eq!(value["operation"], json!("Add"));
        assert_eq!(value["objectName"], json!("app:type=A"));
        assert_eq!(value["filterID"], json!(3));
        assert_eq!(value["handbackID"], json!(0));
        assert!(value.get("filter").is_none());
    }

    #[test]
    fn test_filter_spec_tagging() {
        let spec = FilterSpec::AttributeChange {
            enabled_attributes: vec!["Size".into()],
        };
        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            json!({"kind": "attributeChange", "enabledAttributes": ["Size"]})
        );
    }

    #[test]
    fn test_routing_headers_per_level() {
        assert_eq!(RoutingContext::host("h").headers().len(), 1);
        assert_eq!(RoutingContext::server("h", "dir", "s").headers().len(), 3);
        assert!(RoutingContext::server("h", "dir", "s").is_server_level());
    }

    // ============================================================================
    // Error Tests
    // ============================================================================

    #[test]
    fn test_remote_kind_from_class_name() {
        assert_eq!(
            RemoteErrorKind::from_class_name("javax.management.InstanceNotFoundException"),
            RemoteErrorKind::InstanceNotFound
        );
        assert_eq!(
            RemoteErrorKind::from_class_name("InstanceAlreadyExistsException"),
            RemoteErrorKind::InstanceAlreadyExists
        );
        assert_eq!(
            RemoteErrorKind::from_class_name("com.example.Weird"),
            RemoteErrorKind::Other("Weird".into())
        );
    }

    #[test]
    fn test_remote_exception_into_error() {
        let err = RemoteException::new("javax.management.AttributeNotFoundException", "no Size")
            .into_error();
        assert_eq!(err.remote_kind(), Some(&RemoteErrorKind::AttributeNotFound));
        assert!(err.to_string().contains("no Size"));
    }

    #[test]
    fn test_error_recovery_classification() {
        assert!(RestmxError::Transport("refused".into()).requires_recovery());
        assert!(RestmxError::Timeout(10).requires_recovery());
        assert!(RestmxError::EndpointUnavailable("gone".into()).requires_recovery());
        assert!(!RestmxError::EndpointUnavailable("gone".into()).is_transport());
        assert!(!RestmxError::BadCredentials(401).requires_recovery());
        assert!(!RestmxError::NotConnected.requires_recovery());
    }
}
