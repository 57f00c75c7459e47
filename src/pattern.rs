use crate::{PatternSource, Progress, Rect, VERSION};
use ahash::AHashMap as HashMap;
use anyhow::{anyhow, bail, Context, Result};
use flate2::read::GzDecoder;
use num_bigint::BigInt;
use rand::{Rng, SeedableRng};
use std::{
    io::{Read, Write},
    path::Path,
};

/// Nodes typically have size of about 32 bytes, so 2^32 (128 GiB) nodes
/// is generally enough.
type NodeIdx = u32;
/// A type for measuring the depth of the quadtree.
type SizeLog2 = u32;

/// The rule assumed when none is given.
pub const DEFAULT_RULE: &str = "B3/S23";

/// A Game of Life universe stored as a hash-consed quadtree.
///
/// # Overview
///
/// Each node represents a square region of the pattern. Leaf nodes represent
/// 8x8 cell blocks, while internal nodes subdivide their region into four
/// smaller quadrants (nw, ne, sw, se). Identical nodes are stored once, so
/// huge but regular universes take little memory, and every all-dead region
/// of a given size is the very same node.
///
/// Cells have coordinates `0 <= x, y < 2^size_log2`, `x` growing to the east
/// and `y` to the south. Everything outside is dead.
///
/// As a [`PatternSource`], a `Pattern` is hyper-capable: besides the RLE
/// writer it can write itself in the macrocell format, which mirrors the
/// quadtree and is much more compact for large patterns.
///
/// # Limitations
///
/// *   **Two-State Only:** Only dead and alive cells are stored.
/// *   **Size Limitations:** The practical size is constrained by the `NodeIdx`
///     limit of `2^32` unique nodes. Dense or random patterns may exhaust node
///     indices much sooner than repetitive ones.
#[derive(Clone)]
pub struct Pattern {
    /// The root node of the quadtree, has size of
    /// `(1 << size_log2) x (1 << size_log2)`.
    root: NodeIdx,
    /// `size_log2` is the log2(side length of the square).
    /// For example, a 16x16 pattern has `size_log2` of 4.
    size_log2: SizeLog2,
    /// Storage for the quadtree nodes.
    kiv: KIVMap,
    /// Blank node of every size up to `size_log2`, starting from 8x8.
    blank_nodes: Vec<NodeIdx>,
    rule: String,
}

impl Pattern {
    /// Creates an empty 8x8 pattern with the given rule.
    pub fn new(rule: impl Into<String>) -> Self {
        let mut kiv = KIVMap::new();
        let root = kiv.find_or_create_node(PatternNode::Leaf(0));
        Self {
            root,
            size_log2: 3,
            kiv,
            blank_nodes: vec![root],
            rule: rule.into(),
        }
    }

    /// Creates a pattern from `(x, y)` coordinates of alive cells.
    pub fn from_cells(
        rule: impl Into<String>,
        cells: impl IntoIterator<Item = (u64, u64)>,
    ) -> Self {
        let mut result = Self::new(rule);
        for (x, y) in cells {
            result.set_cell(x, y);
        }
        result
    }

    /// Returns the log base 2 of the pattern's side length.
    pub fn get_size_log2(&self) -> SizeLog2 {
        self.size_log2
    }

    pub fn set_rule(&mut self, rule: impl Into<String>) {
        self.rule = rule.into();
    }

    fn get_node(&self, idx: NodeIdx) -> &PatternNode {
        self.kiv.get_node(idx)
    }

    /// Returns `true` if the node of the given size contains no alive cells.
    fn is_blank(&self, idx: NodeIdx, size_log2: SizeLog2) -> bool {
        self.blank_nodes.get((size_log2.max(3) - 3) as usize) == Some(&idx)
    }

    /// Makes sure `blank_nodes` covers every level of the tree.
    fn refresh_blank_nodes(&mut self) {
        Self::find_or_create_blank_node(self.size_log2, &mut self.kiv, &mut self.blank_nodes);
    }

    /// Counts the total number of alive cells in the pattern.
    ///
    /// This method traverses the quadtree and memoizes intermediate results,
    /// so shared subtrees are counted once.
    ///
    /// # Returns
    ///
    /// A `BigInt` representing the total number of alive cells, which can
    /// be arbitrarily large for very large patterns.
    pub fn population(&self) -> BigInt {
        fn inner(idx: NodeIdx, cache: &mut HashMap<NodeIdx, BigInt>, kiv: &KIVMap) -> BigInt {
            if let Some(x) = cache.get(&idx) {
                return x.clone();
            }
            let result = match *kiv.get_node(idx) {
                PatternNode::Leaf(cells) => BigInt::from(cells.count_ones()),
                PatternNode::Node { nw, ne, sw, se } => [nw, ne, sw, se]
                    .into_iter()
                    .map(|x| inner(x, cache, kiv))
                    .sum(),
            };
            cache.insert(idx, result.clone());
            result
        }

        let mut cache = HashMap::new();
        inner(self.root, &mut cache, &self.kiv)
    }

    /// Expands the pattern to a larger size by adding dead cells to the right and bottom.
    ///
    /// If `size_log2` is less than or equal to the current size, this function does nothing.
    pub fn expand(&mut self, size_log2: SizeLog2) {
        if self.size_log2 >= size_log2 {
            return;
        }
        if size_log2 <= 3 {
            self.size_log2 = size_log2;
            return;
        }
        self.size_log2 = self.size_log2.max(3);
        while self.size_log2 < size_log2 {
            let blank = Self::find_or_create_blank_node(
                self.size_log2,
                &mut self.kiv,
                &mut self.blank_nodes,
            );

            self.root = self.kiv.find_or_create_node(PatternNode::Node {
                nw: self.root,
                ne: blank,
                sw: blank,
                se: blank,
            });
            self.size_log2 += 1;
        }
        self.refresh_blank_nodes();
    }

    /// Returns the state of the cell at `(x, y)`.
    pub fn get_cell(&self, x: u64, y: u64) -> bool {
        match (i64::try_from(x), i64::try_from(y)) {
            (Ok(x), Ok(y)) => self.next_cell(x, y) == Some(0),
            _ => false,
        }
    }

    /// Makes the cell at `(x, y)` alive, expanding the pattern if needed.
    pub fn set_cell(&mut self, x: u64, y: u64) {
        self.expand(u64::BITS - (x | y).leading_zeros());
        self.root = self.set_cell_in(self.root, self.size_log2, x, y);
    }

    fn set_cell_in(&mut self, idx: NodeIdx, size_log2: SizeLog2, x: u64, y: u64) -> NodeIdx {
        match *self.kiv.get_node(idx) {
            PatternNode::Leaf(cells) => self
                .kiv
                .find_or_create_node(PatternNode::Leaf(cells | 1 << (y * 8 + x))),
            PatternNode::Node { nw, ne, sw, se } => {
                let half_log2 = size_log2 - 1;
                let (south, y) = split(y, half_log2);
                let (east, x) = split(x, half_log2);
                let mut children = [nw, ne, sw, se];
                let i = usize::from(south) * 2 + usize::from(east);
                children[i] = self.set_cell_in(children[i], half_log2, x, y);
                let [nw, ne, sw, se] = children;
                self.kiv
                    .find_or_create_node(PatternNode::Node { nw, ne, sw, se })
            }
        }
    }

    /// Creates a random pattern of the specified size.
    ///
    /// # Arguments
    ///
    /// * `size_log2` - Log base 2 of the pattern's side length.
    /// * `seed` - Optional seed for the random number generator.
    ///   If None, seeds from the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if `size_log2` is too large (would cause overflow).
    pub fn random(size_log2: SizeLog2, seed: Option<u64>) -> Result<Self> {
        if 1usize.checked_shl(size_log2 * 2).is_none() {
            return Err(anyhow!("size_log2 {} is too large", size_log2));
        }
        let n = 1usize << size_log2;
        let mut cells = vec![0u8; (n * n).div_ceil(8).max(n)];
        if let Some(x) = seed {
            rand_chacha::ChaCha8Rng::seed_from_u64(x)
        } else {
            rand_chacha::ChaCha8Rng::from_os_rng()
        }
        .fill(&mut cells[..]);
        if size_log2 < 3 {
            // clear the upper bits
            for x in cells.iter_mut() {
                *x &= ((1u32 << n) - 1) as u8;
            }
        }
        Self::from_packed_cells(&cells)
    }

    /// Creates a pattern from packed cell data: a flat array of bytes where
    /// each bit represents one cell, in row-major order with a minimal stride
    /// of 8 cells per row.
    ///
    /// # Errors
    ///
    /// Returns an error if the data does not represent a square with a side that is a power of 2.
    pub fn from_packed_cells(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(anyhow!("Packed cells are empty"));
        }
        let size_log2 = data.len().ilog2().min((data.len().ilog2() + 3) / 2);
        let n = 1usize << size_log2;
        if data.len() != (n * n).div_ceil(8).max(n) {
            return Err(anyhow!(
                "Packed cells don't represent a square with a power of 2 side"
            ));
        }

        if size_log2 < 3 {
            for x in data.iter() {
                if *x & !((1u32 << n) - 1) as u8 != 0 {
                    return Err(anyhow!("Found cells out of bounds"));
                }
            }
        }

        let mut kiv = KIVMap::new();
        let (mut nodes_curr, mut nodes_next) = (vec![], vec![]);

        let stride = n.max(8);
        for y in (0..n).step_by(8) {
            for x in (0..n).step_by(8) {
                let mut leaf = [0; 8];
                for dy in 0..8.min(n) {
                    leaf[dy] = data[(x + (dy + y) * stride) / 8];
                }
                nodes_curr
                    .push(kiv.find_or_create_node(PatternNode::Leaf(u64::from_le_bytes(leaf))));
            }
        }
        let mut t = stride / 8;
        while t != 1 {
            for y in (0..t).step_by(2) {
                for x in (0..t).step_by(2) {
                    let nw = nodes_curr[x + y * t];
                    let ne = nodes_curr[(x + 1) + y * t];
                    let sw = nodes_curr[x + (y + 1) * t];
                    let se = nodes_curr[(x + 1) + (y + 1) * t];
                    nodes_next.push(kiv.find_or_create_node(PatternNode::Node { nw, ne, sw, se }));
                }
            }
            std::mem::swap(&mut nodes_curr, &mut nodes_next);
            nodes_next.clear();
            t >>= 1;
        }
        let mut result = Self {
            root: nodes_curr[0],
            size_log2,
            kiv,
            blank_nodes: vec![],
            rule: DEFAULT_RULE.to_string(),
        };
        result.refresh_blank_nodes();
        Ok(result)
    }

    /// Reads a pattern from a `.mc` or `.mc.gz` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be read, has another extension
    /// or is not a valid macrocell file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".mc.gz") {
            Self::from_compressed_macrocell(&data)
        } else if name.ends_with(".mc") {
            Self::from_macrocell(&data)
        } else {
            Err(anyhow!(
                "Unsupported pattern file {}: expected .mc or .mc.gz",
                path.display()
            ))
        }
        .with_context(|| format!("Failed to load {}", path.display()))
    }

    /// Creates a pattern from data in the [macrocell](https://golly.sourceforge.io/Help/formats.html#mc)
    /// format. The `#R` line, if present, sets the rule.
    ///
    /// # Errors
    ///
    /// Returns an error if data is invalid or describes more than two states.
    pub fn from_macrocell(data: &[u8]) -> Result<Self> {
        let mut kiv = KIVMap::new();
        let mut blank_nodes = vec![];
        let mut codes_and_sizes = HashMap::<u32, (NodeIdx, SizeLog2)>::new();
        let mut last_code_and_size = None;
        let mut rule = DEFAULT_RULE.to_string();

        let mut lines = data
            .split(|&x| x == b'\n')
            .map(|x| x.strip_suffix(b"\r").unwrap_or(x))
            .filter(|x| !x.is_empty());
        if !lines
            .next()
            .ok_or_else(|| anyhow!("Missing format identifier"))?
            .starts_with(b"[M2]")
        {
            return Err(anyhow!("Invalid format identifier"));
        }

        for s in lines {
            if s[0] == b'#' {
                if let Some(r) = s.strip_prefix(b"#R") {
                    rule = String::from_utf8_lossy(r).trim().to_string();
                }
                continue;
            }

            let idx = (codes_and_sizes.len() + 1).try_into().with_context(|| {
                format!("Failed to convert {} to NodeIdx", codes_and_sizes.len() + 1)
            })?;

            let code_and_size = if s[0].is_ascii_digit() {
                // non-leaf
                let numbers: Vec<u32> = s
                    .split(|&x| x == b' ')
                    .map(|part| {
                        std::str::from_utf8(part)
                            .with_context(|| format!("Invalid UTF-8 sequence in {:?}", part))
                            .and_then(|s| {
                                s.parse::<u32>().with_context(|| {
                                    format!("Failed to parse integer from '{}'", s)
                                })
                            })
                    })
                    .collect::<Result<_>>()?;
                if numbers.len() != 5 {
                    return Err(anyhow!("Expected 5 numbers, got {}", numbers.len()));
                }
                if numbers[0] < 4 {
                    return Err(anyhow!(
                        "Node {} has size_log2 {}, expected >= 4",
                        idx,
                        numbers[0],
                    ));
                }

                let mut resolve = |x: u32| -> Result<NodeIdx> {
                    if x == 0 {
                        Ok(Self::find_or_create_blank_node(
                            numbers[0] - 1,
                            &mut kiv,
                            &mut blank_nodes,
                        ))
                    } else {
                        let (code, size_log2) =
                            codes_and_sizes.get(&x).copied().ok_or_else(|| {
                                anyhow!("Reference to undeclared node with code {}", x)
                            })?;
                        if size_log2 != numbers[0] - 1 {
                            return Err(anyhow!(
                                "Node {} has size_log2 {}, expected {}",
                                x,
                                size_log2,
                                numbers[0] - 1
                            ));
                        }
                        Ok(code)
                    }
                };

                let nw = resolve(numbers[1])?;
                let ne = resolve(numbers[2])?;
                let sw = resolve(numbers[3])?;
                let se = resolve(numbers[4])?;
                let code = kiv.find_or_create_node(PatternNode::Node { nw, ne, sw, se });
                (code, numbers[0])
            } else {
                // is leaf
                let mut cells = 0u64;
                let (mut i, mut j) = (0, 0);
                for &c in s {
                    match c {
                        b'$' => (i, j) = (i + 1, 0),
                        b'*' => {
                            if i >= 8 || j >= 8 {
                                return Err(anyhow!(
                                    "Leaf {} does not fit in 8x8",
                                    String::from_utf8_lossy(s)
                                ));
                            }
                            cells |= 1 << (i * 8 + j);
                            j += 1;
                        }
                        b'.' => {
                            j += 1;
                        }
                        _ => {
                            return Err(anyhow!(
                                "Invalid symbol '{}' in leaf {}",
                                c as char,
                                String::from_utf8_lossy(s)
                            ))
                        }
                    }
                }
                let code = kiv.find_or_create_node(PatternNode::Leaf(cells));
                (code, 3)
            };
            last_code_and_size = Some(code_and_size);
            codes_and_sizes.insert(idx, code_and_size);
        }
        let (root, size_log2) =
            last_code_and_size.ok_or_else(|| anyhow!("No nodes found in the pattern"))?;
        let mut result = Self {
            root,
            size_log2,
            kiv,
            blank_nodes,
            rule,
        };
        result.refresh_blank_nodes();
        Ok(result)
    }

    /// Creates a pattern from gzip-compressed macrocell data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid gzip or
    /// [`Pattern::from_macrocell`] fails.
    pub fn from_compressed_macrocell(compressed_data: &[u8]) -> Result<Self> {
        let mut decoder = GzDecoder::new(compressed_data);
        let mut decompressed_data = Vec::new();
        decoder
            .read_to_end(&mut decompressed_data)
            .context("Failed to decompress macrocell data")?;
        Self::from_macrocell(&decompressed_data)
    }

    /// Streams the pattern to `sink` in the macrocell format.
    ///
    /// Children are written before their parents and every distinct node
    /// once, so the output is as compact as the quadtree itself. Tiny
    /// patterns are extended to 8x8 cells.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is blank, the sink fails, or
    /// `progress` requested cancellation.
    pub fn write_macrocell(&self, sink: &mut dyn Write, progress: &mut dyn Progress) -> Result<()> {
        if self.is_blank(self.root, self.size_log2) {
            return Err(anyhow!("Cannot serialize blank pattern"));
        }

        write!(sink, "[M2] (gol_patterns {})\n#R {}\n", VERSION, self.rule)?;
        let mut writer = MacrocellWriter {
            pattern: self,
            sink,
            progress,
            codes: HashMap::new(),
        };
        writer.write_node(self.root, self.size_log2)?;
        tracing::debug!(nodes = writer.codes.len(), "macrocell written");
        Ok(())
    }

    /// Finds the outermost alive cell in the direction of `edge`.
    fn edge(&self, edge: Edge) -> Option<BigInt> {
        fn inner(
            this: &Pattern,
            idx: NodeIdx,
            size_log2: SizeLog2,
            edge: Edge,
            cache: &mut HashMap<NodeIdx, Option<BigInt>>,
        ) -> Option<BigInt> {
            if this.is_blank(idx, size_log2) {
                return None;
            }
            if let Some(x) = cache.get(&idx) {
                return x.clone();
            }

            let result = match *this.get_node(idx) {
                PatternNode::Leaf(cells) => Some(BigInt::from(edge.of_leaf(cells))),
                PatternNode::Node { nw, ne, sw, se } => {
                    let (near, far) = match edge {
                        Edge::Top | Edge::Bottom => ([nw, ne], [sw, se]),
                        Edge::Left | Edge::Right => ([nw, sw], [ne, se]),
                    };
                    let mut best = |pair: [NodeIdx; 2]| {
                        pair.into_iter()
                            .filter_map(|x| inner(this, x, size_log2 - 1, edge, cache))
                            .reduce(|a, b| if edge.is_min() { a.min(b) } else { a.max(b) })
                    };
                    let shift = |x: BigInt| x + (BigInt::from(1) << (size_log2 - 1));
                    if edge.is_min() {
                        best(near).or_else(|| best(far).map(shift))
                    } else {
                        best(far).map(shift).or_else(|| best(near))
                    }
                }
            };
            cache.insert(idx, result.clone());
            result
        }

        let mut cache = HashMap::new();
        inner(self, self.root, self.size_log2, edge, &mut cache)
    }

    /// Distance from column `x` to the next alive cell on row `y`,
    /// both relative to the node.
    fn next_cell_in(&self, idx: NodeIdx, size_log2: SizeLog2, x: u64, y: u64) -> Option<u64> {
        if self.is_blank(idx, size_log2) {
            return None;
        }
        match *self.get_node(idx) {
            PatternNode::Leaf(cells) => {
                let row = (cells >> (y * 8)) as u8 >> x;
                (row != 0).then(|| u64::from(row.trailing_zeros()))
            }
            PatternNode::Node { nw, ne, sw, se } => {
                let half_log2 = size_log2 - 1;
                let (south, y) = split(y, half_log2);
                let (west, east) = if south { (sw, se) } else { (nw, ne) };
                let (in_east, x) = split(x, half_log2);
                if in_east {
                    return self.next_cell_in(east, half_log2, x, y);
                }
                if let Some(dx) = self.next_cell_in(west, half_log2, x, y) {
                    return Some(dx);
                }
                // columns of the eastern half beyond u64 can't be addressed anyway
                let to_east = 1u64.checked_shl(half_log2)? - x;
                Some(to_east + self.next_cell_in(east, half_log2, 0, y)?)
            }
        }
    }

    /// Returns `true` if the coordinate lies inside the pattern.
    fn contains(&self, v: u64) -> bool {
        v.checked_shr(self.size_log2).unwrap_or(0) == 0
    }

    /// Finds or creates a blank node (containing all dead cells) of the
    /// specified size, caching all smaller ones along the way.
    ///
    /// # Arguments
    ///
    /// * `size_log2` - Log base 2 of the node's side length.
    /// * `kiv` - The key-index-value map storing the pattern nodes.
    /// * `blank_nodes` - Cache of previously created blank nodes of different sizes.
    fn find_or_create_blank_node(
        size_log2: SizeLog2,
        kiv: &mut KIVMap,
        blank_nodes: &mut Vec<NodeIdx>,
    ) -> NodeIdx {
        let i = (size_log2.max(3) - 3) as usize;
        while blank_nodes.len() <= i {
            let next = if let Some(&b) = blank_nodes.last() {
                PatternNode::Node {
                    nw: b,
                    ne: b,
                    sw: b,
                    se: b,
                }
            } else {
                PatternNode::Leaf(0)
            };
            blank_nodes.push(kiv.find_or_create_node(next));
        }
        blank_nodes[i]
    }
}

impl Default for Pattern {
    /// Creates a new empty 8x8 pattern with the B3/S23 rule.
    fn default() -> Self {
        Self::new(DEFAULT_RULE)
    }
}

impl PatternSource for Pattern {
    fn is_empty(&self) -> bool {
        self.is_blank(self.root, self.size_log2)
    }

    fn rule(&self) -> &str {
        &self.rule
    }

    fn population(&self) -> BigInt {
        Pattern::population(self)
    }

    fn find_edges(&self) -> Option<Rect> {
        Some(Rect {
            top: self.edge(Edge::Top)?,
            left: self.edge(Edge::Left)?,
            bottom: self.edge(Edge::Bottom)?,
            right: self.edge(Edge::Right)?,
        })
    }

    fn next_cell(&self, x: i64, y: i64) -> Option<u64> {
        // everything left of or above the origin is dead
        let y = u64::try_from(y).ok()?;
        let start = x.max(0) as u64;
        if !self.contains(y) || !self.contains(start) {
            return None;
        }
        let dx = self.next_cell_in(self.root, self.size_log2, start, y)?;
        Some(dx + (i128::from(start as i64) - i128::from(x)) as u64)
    }

    fn is_hyper_capable(&self) -> bool {
        true
    }

    fn write_native_format(&self, sink: &mut dyn Write, progress: &mut dyn Progress) -> Result<()> {
        self.write_macrocell(sink, progress)
    }
}

/// Splits a coordinate at the middle of a node with halves of `2^half_log2`:
/// returns whether it lies in the far half and its offset inside that half.
fn split(v: u64, half_log2: SizeLog2) -> (bool, u64) {
    match v.checked_shr(half_log2) {
        Some(hi) => (hi != 0, v & ((1 << half_log2) - 1)),
        None => (false, v),
    }
}

#[derive(Clone, Copy)]
enum Edge {
    Top,
    Left,
    Bottom,
    Right,
}

impl Edge {
    fn is_min(self) -> bool {
        matches!(self, Edge::Top | Edge::Left)
    }

    /// Coordinate of the outermost alive cell of a non-blank leaf.
    fn of_leaf(self, cells: u64) -> u32 {
        let columns = cells.to_le_bytes().into_iter().fold(0, |acc, row| acc | row);
        match self {
            Edge::Top => cells.trailing_zeros() / 8,
            Edge::Bottom => (63 - cells.leading_zeros()) / 8,
            Edge::Left => columns.trailing_zeros(),
            Edge::Right => 7 - columns.leading_zeros(),
        }
    }
}

/// State of a single macrocell write.
struct MacrocellWriter<'a> {
    pattern: &'a Pattern,
    sink: &'a mut dyn Write,
    progress: &'a mut dyn Progress,
    /// Line numbers of the nodes already written.
    codes: HashMap<NodeIdx, usize>,
}

impl MacrocellWriter<'_> {
    const POLL_INTERVAL: usize = 4096;

    fn write_node(&mut self, idx: NodeIdx, size_log2: SizeLog2) -> Result<usize> {
        // if already serialized
        if let Some(&x) = self.codes.get(&idx) {
            return Ok(x);
        }
        if self.pattern.is_blank(idx, size_log2) {
            return Ok(0);
        }

        match *self.pattern.get_node(idx) {
            PatternNode::Leaf(cells) => {
                let mut line = Vec::with_capacity(80);
                for row in cells.to_le_bytes() {
                    for i in 0..8 {
                        line.push(if (row >> i) & 1 != 0 { b'*' } else { b'.' });
                    }
                    while line.ends_with(b".") {
                        line.pop();
                    }
                    line.push(b'$');
                }
                while line.ends_with(b"$$") {
                    line.pop();
                }
                line.push(b'\n');
                self.sink.write_all(&line)?;
            }
            PatternNode::Node { nw, ne, sw, se } => {
                let nw = self.write_node(nw, size_log2 - 1)?;
                let ne = self.write_node(ne, size_log2 - 1)?;
                let sw = self.write_node(sw, size_log2 - 1)?;
                let se = self.write_node(se, size_log2 - 1)?;
                writeln!(self.sink, "{} {} {} {} {}", size_log2, nw, ne, sw, se)?;
            }
        }

        let code = self.codes.len() + 1;
        self.codes.insert(idx, code);
        if code % Self::POLL_INTERVAL == 0 {
            let fraction = code as f64 / self.pattern.kiv.len() as f64;
            if self
                .progress
                .poll(fraction.min(1.0), &format!("Nodes written: {}", code))
            {
                bail!("Macrocell writing cancelled");
            }
        }
        Ok(code)
    }
}

/// A node is either a leaf (8x8 cells) or a non-leaf (4x4 nodes).
/// Cells in the leaf are stored as a 64-bit integer in row-major order.
#[derive(Clone, Copy, PartialEq, Eq)]
enum PatternNode {
    Leaf(u64),
    Node {
        nw: NodeIdx,
        ne: NodeIdx,
        sw: NodeIdx,
        se: NodeIdx,
    },
}

impl PatternNode {
    /// Fast yet effective hash function.
    /// It is used for indexing nodes in the KIVMap.
    fn hash(&self) -> u32 {
        let h = match self {
            PatternNode::Leaf(cells) => (cells ^ (cells >> 32)) as u32,
            PatternNode::Node { nw, ne, sw, se } => 0u32
                .wrapping_add((nw).wrapping_mul(5))
                .wrapping_add((ne).wrapping_mul(17))
                .wrapping_add((sw).wrapping_mul(257))
                .wrapping_add((se).wrapping_mul(65537)),
        };
        h.wrapping_add(h.rotate_right(11))
    }
}

/// Key-Index-Value map: growable hashtable with linked list chains.
///
/// Nodes are retrieved either by index or by content, the latter creating
/// the node if it doesn't exist yet. This is what makes equal subtrees of a
/// [`Pattern`] share storage.
///
/// # Panics
///
/// Panics on running out of indexes (when the number of nodes exceeds
/// the maximum value of NodeIdx).
#[derive(Clone)]
struct KIVMap {
    hashmap_chains: Vec<NodeIdx>,
    storage: Vec<NodeAndNext>,
    capacity_log2: u32,
}

#[derive(Clone, Copy)]
struct NodeAndNext {
    node: PatternNode,
    next: NodeIdx,
}

impl KIVMap {
    const INITIAL_CAPACITY_LOG2: u32 = 4;

    fn new() -> Self {
        let mut storage = Vec::with_capacity(1 << Self::INITIAL_CAPACITY_LOG2);
        // index 0 is reserved
        storage.push(NodeAndNext {
            node: PatternNode::Leaf(0),
            next: 0,
        });
        KIVMap {
            hashmap_chains: vec![0; 1 << Self::INITIAL_CAPACITY_LOG2],
            storage,
            capacity_log2: Self::INITIAL_CAPACITY_LOG2,
        }
    }

    fn len(&self) -> usize {
        self.storage.len()
    }

    fn get_node(&self, idx: NodeIdx) -> &PatternNode {
        &self.storage[idx as usize].node
    }

    fn find_or_create_node(&mut self, node: PatternNode) -> NodeIdx {
        let i = node.hash() as usize & (self.hashmap_chains.len() - 1);
        let mut curr = self.hashmap_chains[i];
        // search for the node in the linked list
        while curr != 0 {
            if self.storage[curr as usize].node == node {
                return curr;
            }
            curr = self.storage[curr as usize].next;
        }

        self.storage.push(NodeAndNext {
            node,
            next: self.hashmap_chains[i],
        });
        let idx = (self.storage.len() - 1).try_into().expect("Index overflow");
        self.hashmap_chains[i] = idx;
        if self.storage.len() > self.hashmap_chains.len() && self.capacity_log2 != u32::BITS {
            self.rehash();
        }
        idx
    }

    fn rehash(&mut self) {
        self.capacity_log2 += 1;
        let new_size = self.hashmap_chains.len() * 2;
        let mut new_chains = vec![0; new_size];
        for &chain in &self.hashmap_chains {
            let mut curr = chain as usize;
            while curr != 0 {
                let hash = self.storage[curr].node.hash() as usize;
                let next = self.storage[curr].next as usize;
                let index = hash & (new_size - 1);
                self.storage[curr].next = new_chains[index];
                new_chains[index] = curr as NodeIdx;
                curr = next;
            }
        }
        self.hashmap_chains = new_chains;
    }
}
