//! Static profile data served by the lookup tools.

use serde::Serialize;

pub const RESUME: &str = include_str!("data/resume.md");

/// A public repository as listed by `get_github_repos`.
#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    pub name: &'static str,
    pub description: &'static str,
    pub language: &'static str,
    pub topics: &'static [&'static str],
}

/// Long-form write-up of a project, keyed by its display name.
#[derive(Debug, Clone, Copy)]
pub struct ProjectDetails {
    pub name: &'static str,
    pub details: &'static str,
}

pub const REPOSITORIES: &[Repository] = &[
    Repository {
        name: "claude-pr-review-team",
        description: "AI-powered code review tool that uses Claude to provide automated, \
            high-quality pull request reviews for teams. Integrates with GitHub \
            Actions for seamless CI/CD workflow.",
        language: "Python",
        topics: &["ai", "code-review", "claude", "github-actions"],
    },
    Repository {
        name: "podcastcut-skills",
        description: "AI-driven podcast editing tool that automatically identifies and \
            cuts segments of interest from podcast audio using speech recognition \
            and language models.",
        language: "Python",
        topics: &["ai", "podcast", "audio-processing", "nlp"],
    },
    Repository {
        name: "deepagents-quickstarts",
        description: "Quickstart templates and examples for building deep learning-based \
            AI agents. Includes patterns for tool use, multi-agent systems, \
            and reinforcement learning.",
        language: "Python",
        topics: &["ai-agents", "deep-learning", "quickstart"],
    },
    Repository {
        name: "tpu_training",
        description: "Framework and utilities for training large-scale deep learning \
            models on Google TPUs. Includes distributed training strategies \
            and performance optimization.",
        language: "Python",
        topics: &["tpu", "distributed-training", "deep-learning"],
    },
    Repository {
        name: "FMCW-DopplerPointTransformerNet",
        description: "A Transformer-based neural network for processing FMCW radar \
            Doppler point clouds. Designed for autonomous driving perception \
            tasks such as object detection and velocity estimation.",
        language: "Python",
        topics: &["radar", "transformer", "autonomous-driving", "perception"],
    },
    Repository {
        name: "dinov2-with-rope",
        description: "Extension of DINOv2 self-supervised vision transformer with \
            Rotary Position Embedding (RoPE) for improved spatial reasoning \
            and generalization to varying image resolutions.",
        language: "Python",
        topics: &["vision-transformer", "self-supervised", "rope", "dinov2"],
    },
    Repository {
        name: "podcast-transcriber-mcp",
        description: "A Model Context Protocol (MCP) server for transcribing podcasts. \
            Provides podcast transcription as a tool that AI assistants can \
            call to process and analyze podcast content.",
        language: "Python",
        topics: &["mcp", "podcast", "transcription", "ai-tools"],
    },
];

pub const PROJECTS: &[ProjectDetails] = &[
    ProjectDetails {
        name: "claude-pr-review-team",
        details: "claude-pr-review-team is an AI-powered code review system built on Claude. \
            It automates pull request reviews by analyzing code changes, identifying \
            potential bugs, suggesting improvements, and providing architectural feedback. \
            The system integrates directly with GitHub Actions, allowing teams to get \
            automated, high-quality reviews as part of their CI/CD pipeline. \
            It supports multi-file analysis, understands context across the codebase, \
            and provides actionable suggestions with code examples.",
    },
    ProjectDetails {
        name: "podcastcut-skills",
        details: "podcastcut-skills is an AI-driven podcast editing tool. It uses speech \
            recognition to transcribe podcast episodes, then employs language models \
            to identify segments of interest based on user-defined topics or keywords. \
            The tool can automatically cut and export relevant segments, saving hours \
            of manual editing. It supports multiple audio formats and can handle \
            long-form podcast episodes efficiently.",
    },
    ProjectDetails {
        name: "deepagents-quickstarts",
        details: "deepagents-quickstarts provides quickstart templates for building AI agents \
            powered by deep learning. It includes examples for tool-using agents, \
            multi-agent collaboration systems, and agents that learn from feedback \
            using reinforcement learning. The repository serves as a practical guide \
            for developers looking to build sophisticated AI agent systems.",
    },
    ProjectDetails {
        name: "tpu_training",
        details: "tpu_training is a framework for training deep learning models on Google \
            Cloud TPUs. It provides utilities for distributed training, mixed precision, \
            data pipeline optimization, and checkpoint management. The framework \
            supports PyTorch/XLA and includes strategies for scaling training across \
            multiple TPU cores and pods.",
    },
    ProjectDetails {
        name: "FMCW-DopplerPointTransformerNet",
        details: "FMCW-DopplerPointTransformerNet is a neural network architecture that applies \
            Transformer-based attention mechanisms to FMCW radar Doppler point clouds. \
            It is designed for autonomous driving perception, handling tasks like object \
            detection and velocity estimation from radar data. The model leverages the \
            unique properties of Doppler information to improve 3D perception, especially \
            in adverse weather conditions where cameras and LiDAR may struggle.",
    },
    ProjectDetails {
        name: "dinov2-with-rope",
        details: "dinov2-with-rope extends Meta's DINOv2 self-supervised vision transformer \
            by incorporating Rotary Position Embedding (RoPE). RoPE provides relative \
            positional encoding that enables the model to generalize to different image \
            resolutions at inference time without retraining. This modification improves \
            spatial reasoning and makes the model more flexible for downstream tasks \
            like object detection and segmentation.",
    },
    ProjectDetails {
        name: "podcast-transcriber-mcp",
        details: "podcast-transcriber-mcp is a Model Context Protocol (MCP) server that provides \
            podcast transcription capabilities as a tool for AI assistants. It allows \
            AI models to call transcription services programmatically, enabling use cases \
            like podcast summarization, topic extraction, and content analysis. Built \
            following the MCP specification, it integrates seamlessly with Claude and \
            other MCP-compatible AI assistants.",
    },
];
