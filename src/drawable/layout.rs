use crate::shader::AttributeSlot;

/// Bytes per packed vertex component.
pub const COMPONENT_SIZE: u64 = std::mem::size_of::<f32>() as u64;

/// Per-vertex attribute stream a drawable can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Coordinates,
    Colors,
    Normals,
}

impl ChannelKind {
    /// Packing order inside the vertex buffer.
    pub const ALL: [ChannelKind; 3] = [
        ChannelKind::Coordinates,
        ChannelKind::Colors,
        ChannelKind::Normals,
    ];

    /// Name of the shader attribute this channel feeds.
    pub fn attribute_name(self) -> &'static str {
        match self {
            ChannelKind::Coordinates => "position",
            ChannelKind::Colors => "color",
            ChannelKind::Normals => "normal",
        }
    }
}

/// Where one channel lives inside the shared vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeBinding {
    pub kind: ChannelKind,
    pub slot: AttributeSlot,
    /// Byte offset of the channel's first component.
    pub offset: u64,
    /// Byte length of the channel.
    pub span: u64,
    /// Components per vertex; the stride is `components * 4` with no
    /// interleaving.
    pub components: u32,
}

impl AttributeBinding {
    pub fn stride(&self) -> u64 {
        u64::from(self.components) * COMPONENT_SIZE
    }

    pub fn end(&self) -> u64 {
        self.offset + self.span
    }
}

/// Non-interleaved packing of the active channels of a drawable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    bindings: Vec<AttributeBinding>,
    total_size: u64,
}

impl VertexLayout {
    /// Packs `channels` back to back in the order given.
    pub fn pack(
        channels: impl IntoIterator<Item = (ChannelKind, AttributeSlot)>,
        vertex_count: usize,
        tuple_size: usize,
    ) -> Self {
        let span = Self::span(vertex_count, tuple_size);
        let mut offset = 0;
        let bindings = channels
            .into_iter()
            .map(|(kind, slot)| {
                let binding = AttributeBinding {
                    kind,
                    slot,
                    offset,
                    span,
                    components: tuple_size as u32,
                };
                offset += span;
                binding
            })
            .collect();
        Self {
            bindings,
            total_size: offset,
        }
    }

    /// Byte length of one channel holding `vertex_count` tuples.
    pub fn span(vertex_count: usize, tuple_size: usize) -> u64 {
        (vertex_count * tuple_size) as u64 * COMPONENT_SIZE
    }

    pub fn bindings(&self) -> &[AttributeBinding] {
        &self.bindings
    }

    pub fn binding(&self, kind: ChannelKind) -> Option<&AttributeBinding> {
        self.bindings.iter().find(|binding| binding.kind == kind)
    }

    pub fn binding_for_slot(&self, slot: AttributeSlot) -> Option<&AttributeBinding> {
        self.bindings.iter().find(|binding| binding.slot == slot)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
