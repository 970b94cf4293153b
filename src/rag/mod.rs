// Evidence gathering and answer synthesis
//
// Components:
// - Retrieval: vector-store adapter and parallel query coordinator
// - Evidence: deduplicated, capped passage pool for one session
// - Context: prompt digests and numbered passages
// - Synthesizer: final answer with citations and caveats

pub mod context;
pub mod evidence;
pub mod retrieval;
pub mod synthesizer;

pub use context::{Citation, ContextBuilder};
pub use evidence::{EvidenceItem, EvidencePool, MergeReport};
pub use retrieval::{RetrievalCoordinator, RetrievedPassage, Retriever};
pub use synthesizer::{Caveat, ResearchAnswer, SynthesisInput, Synthesizer, SynthesizerConfig};
