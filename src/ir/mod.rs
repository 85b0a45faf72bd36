pub mod node;
pub mod builder;
pub mod func;
pub mod serialize;
pub mod errors;

pub use node::{
    AlignData,
    CallData,
    ConstPoolData,
    DataBody,
    FuncData,
    InstData,
    JumpData,
    LabelData,
    Node,
    NodeFlags,
    NodeId,
    NodeKind,
    RetData,
    INLINE_DATA_SIZE,
};
pub use builder::Builder;
pub use func::{
    ArgSlot,
    CallConv,
    ConstScope,
    FuncDetail,
    FuncSignature,
    FuncValue,
    TypeId,
};
pub use errors::UnboundLabels;
