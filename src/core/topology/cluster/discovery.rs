//! Parses a `CLUSTER NODES`-shaped reply into partitions (spec §4.2
//! "Cluster discovery"). One line per node: `id ip:port flags master -
//! ping pong epoch link-state slot slot ...`, slots either single numbers
//! or `start-end` ranges.

use crate::core::connection::endpoint::Endpoint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub primary: Endpoint,
    pub replicas: Vec<Endpoint>,
    pub slots: Vec<(u16, u16)>,
    pub primary_failed: bool,
}

/// Parses the whole `CLUSTER NODES` bulk reply body into partitions. Each
/// primary line becomes one partition; replica lines are attached to the
/// partition whose node id they reference as `master-id`.
pub fn parse_cluster_nodes(body: &str) -> Vec<Partition> {
    struct Node {
        id: String,
        endpoint: Endpoint,
        is_master: bool,
        master_id: Option<String>,
        failed: bool,
        slots: Vec<(u16, u16)>,
    }

    let mut nodes = Vec::new();
    for line in body.lines() {
        let fields: Vec<&str> = line.split_ascii_whitespace().collect();
        if fields.len() < 8 {
            continue;
        }
        let id = fields[0].to_string();
        let addr = fields[1].split('@').next().unwrap_or(fields[1]);
        let Some((host, port_str)) = addr.rsplit_once(':') else {
            continue;
        };
        let Ok(port) = port_str.parse::<u16>() else {
            continue;
        };
        let flags = fields[2];
        let is_master = flags.contains("master");
        let failed = flags.contains("fail");
        let master_id = if fields[3] == "-" {
            None
        } else {
            Some(fields[3].to_string())
        };

        let mut slots = Vec::new();
        for token in &fields[8..] {
            if token.starts_with('[') {
                continue; // importing/migrating slot marker, not a stable assignment
            }
            if let Some((start, end)) = token.split_once('-') {
                if let (Ok(s), Ok(e)) = (start.parse(), end.parse()) {
                    slots.push((s, e));
                }
            } else if let Ok(s) = token.parse::<u16>() {
                slots.push((s, s));
            }
        }

        nodes.push(Node {
            id,
            endpoint: Endpoint::new(host.to_string(), port),
            is_master,
            master_id,
            failed,
            slots,
        });
    }

    let mut partitions: Vec<Partition> = Vec::new();
    let mut index_by_id = std::collections::HashMap::new();
    for node in &nodes {
        if node.is_master {
            index_by_id.insert(node.id.clone(), partitions.len());
            partitions.push(Partition {
                primary: node.endpoint.clone(),
                replicas: Vec::new(),
                slots: node.slots.clone(),
                primary_failed: node.failed,
            });
        }
    }
    for node in &nodes {
        if !node.is_master
            && let Some(master_id) = &node.master_id
            && let Some(&idx) = index_by_id.get(master_id)
        {
            partitions[idx].replicas.push(node.endpoint.clone());
        }
    }
    partitions
}

impl Partition {
    pub fn covers(&self, slot: u16) -> bool {
        self.slots.iter().any(|&(s, e)| slot >= s && slot <= e)
    }

    pub fn total_slots(&self) -> u32 {
        self.slots.iter().map(|&(s, e)| (e - s + 1) as u32).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_primary_line_with_a_slot_range() {
        let body = "07c3 127.0.0.1:7000@17000 myself,master - 0 0 1 connected 0-5460\n";
        let partitions = parse_cluster_nodes(body);
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].primary, Endpoint::new("127.0.0.1", 7000));
        assert!(partitions[0].covers(100));
        assert!(!partitions[0].covers(6000));
    }

    #[test]
    fn attaches_a_replica_to_its_primary() {
        let body = "\
m1 127.0.0.1:7000@17000 master - 0 0 1 connected 0-5460
r1 127.0.0.1:7001@17001 slave m1 0 0 1 connected
";
        let partitions = parse_cluster_nodes(body);
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].replicas, vec![Endpoint::new("127.0.0.1", 7001)]);
    }

    #[test]
    fn ignores_importing_and_migrating_slot_markers() {
        let body = "m1 127.0.0.1:7000@17000 master - 0 0 1 connected 0-100 [200-<-abcd]\n";
        let partitions = parse_cluster_nodes(body);
        assert_eq!(partitions[0].total_slots(), 101);
    }
}
