//! Building an engine from config.toml

use super::harness::*;

#[test]
fn test_full_config_builds() {
    let content = format!(
        r#"
[engine]
cores = [0, 1]
timer_period_ms = 500
arp_retry_limit = 5

{}
[routing]
interfaces = ["0:10.0.0.1/24,GRATARP", "1:2#10.0.1.1/24", "2:"]
subinterfaces = ["0:10.0.0.254"]
static_arp = ["10.0.0.2@0a:00:00:00:00:02"]
routes = ["0.0.0.0/0@10.0.0.2", "2#10.8.0.0/16@blackhole"]

[scheduling]
pins = ["1:1,0"]
"#,
        memory_ports(3)
    );
    let node = Node::from_toml(&content).unwrap();
    let engine = &node.engine;

    assert_eq!(engine.ports().len(), 3);
    assert_eq!(engine.settings.arp_retry_limit, 5);
    assert_eq!(engine.port(1).unwrap().domain, 2);
    assert_eq!(engine.port(2).unwrap().domain, 1);
    assert!(engine.port(0).unwrap().gratarp);
    assert!(engine.port(2).unwrap().state().ipaddr.is_none());
    assert_eq!(engine.port(1).unwrap().rx_core, Some(1));
    assert_eq!(engine.port(1).unwrap().tx_core, Some(0));
    assert!(engine.tables.lat().contains(0, ip("10.0.0.254")));
}

#[test]
fn test_pin_to_idle_core_is_fatal() {
    let content = format!(
        "{}[scheduling]\npins = [\"0:5\"]\n",
        memory_ports(1)
    );
    assert!(Node::from_toml(&content).is_err());
}

#[test]
fn test_nexthop_outside_subnets_is_fatal() {
    let content = format!(
        "{}[routing]\ninterfaces = [\"0:10.0.0.1/24\"]\nroutes = [\"10.9.0.0/16@192.168.9.1\"]\n",
        memory_ports(1)
    );
    assert!(Node::from_toml(&content).is_err());
}

#[test]
fn test_sparse_port_ids_rejected() {
    let content = r#"
[[ports]]
id = 1
backend = "memory"
mac = "02:00:00:00:00:01"
"#;
    assert!(Node::from_toml(content).is_err());
}

#[test]
fn test_memory_port_requires_mac() {
    let cfg = dtfwd::config::from_str("[[ports]]\nid = 0\nbackend = \"memory\"\n").unwrap();
    assert!(dtfwd::capture::open(&cfg.ports[0]).is_err());
}
