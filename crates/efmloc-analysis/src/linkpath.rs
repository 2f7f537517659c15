//! Ordered sequences of directed links, and their slicing algebra.

use itertools::Itertools;

use efmloc_simdata::{Link, NodeId};

/// An ordered sequence of directed links.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkPath {
    pub links: Vec<Link>,
}

impl LinkPath {
    pub fn new(links: Vec<Link>) -> Self {
        Self { links }
    }

    /// Builds the link path implied by consecutive nodes of a flow path.
    /// Fewer than two nodes means there is no usable path.
    pub fn from_nodes(nodes: &[NodeId]) -> Option<Self> {
        if nodes.len() < 2 {
            return None;
        }
        let links = nodes
            .iter()
            .tuple_windows()
            .map(|(&a, &b)| Link::new(a, b))
            .collect();
        Some(Self { links })
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Prefix through the first link ending at `node`. Empty if the path
    /// starts at `node`.
    pub fn up_to(&self, node: NodeId) -> LinkPath {
        let mut links = Vec::new();
        if self.links.first().map_or(true, |l| l.src == node) {
            return LinkPath::new(links);
        }
        for &link in &self.links {
            links.push(link);
            if link.dst == node {
                break;
            }
        }
        LinkPath::new(links)
    }

    /// Suffix starting at the first link departing from `node`.
    pub fn from_node_to_end(&self, node: NodeId) -> LinkPath {
        let mut links = Vec::new();
        let mut started = false;
        for &link in &self.links {
            if link.src == node {
                started = true;
            }
            if started {
                links.push(link);
            }
        }
        LinkPath::new(links)
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.links.iter().any(|l| l.src == node || l.dst == node)
    }

    pub fn contains_link(&self, link: Link) -> bool {
        self.links.contains(&link)
    }

    /// This path followed by `other`.
    pub fn append(&self, other: &LinkPath) -> LinkPath {
        let mut links = self.links.clone();
        links.extend_from_slice(&other.links);
        LinkPath::new(links)
    }

    /// `other` followed by this path.
    pub fn append_to(&self, other: &LinkPath) -> LinkPath {
        other.append(self)
    }
}

impl std::fmt::Display for LinkPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for link in &self.links {
            write!(f, "{link}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(nodes: &[u32]) -> LinkPath {
        let nodes = nodes.iter().map(|&n| NodeId::new(n)).collect::<Vec<_>>();
        LinkPath::from_nodes(&nodes).unwrap()
    }

    #[test]
    fn from_nodes_needs_two_nodes() {
        assert!(LinkPath::from_nodes(&[]).is_none());
        assert!(LinkPath::from_nodes(&[NodeId::new(1)]).is_none());
        assert_eq!(path(&[1, 2, 3]).len(), 2);
    }

    #[test]
    fn up_to_and_from_partition_the_path() {
        let p = path(&[1, 2, 3, 4]);
        for node in [1u32, 2, 3, 4] {
            let node = NodeId::new(node);
            let joined = p.up_to(node).append(&p.from_node_to_end(node));
            assert_eq!(joined, p, "partition broken at {node}");
        }
    }

    #[test]
    fn up_to_is_empty_at_the_source() {
        let p = path(&[1, 2, 3]);
        assert!(p.up_to(NodeId::new(1)).is_empty());
        assert_eq!(p.up_to(NodeId::new(2)).len(), 1);
        assert_eq!(p.up_to(NodeId::new(3)).len(), 2);
    }

    #[test]
    fn append_to_mirrors_append() {
        let p = path(&[1, 2]);
        let q = path(&[2, 3]);
        assert_eq!(p.append(&q), q.append_to(&p));
    }

    #[test]
    fn node_and_link_membership() {
        let p = path(&[1, 2, 3]);
        assert!(p.contains_node(NodeId::new(2)));
        assert!(!p.contains_node(NodeId::new(9)));
        assert!(p.contains_link(Link::new(NodeId::new(1), NodeId::new(2))));
        assert!(!p.contains_link(Link::new(NodeId::new(2), NodeId::new(1))));
    }
}
