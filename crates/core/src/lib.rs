pub mod features {
    pub mod domain {
        pub mod cmvn;
        pub mod context_window;
        pub mod feature_source;
        pub mod feature_spec;
    }
    pub mod infrastructure;
}

pub mod targets {
    pub mod domain {
        pub mod alignment_table;
        pub mod target_coder;
    }
    pub mod infrastructure;
}

pub mod batching {
    pub mod domain {
        pub mod batch_dispenser;
        pub mod minibatch;
    }
    pub mod infrastructure;
}

pub mod nnet {
    pub mod domain {
        pub mod nnet;
    }
    pub mod infrastructure;
}

pub mod stages {
    pub mod domain {
        pub mod experiment_layout;
        pub mod stage;
        pub mod stage_executor;
        pub mod stage_scheduler;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod compute_features_use_case;
    pub mod decode_nnet_use_case;
    pub mod pipeline_config;
    pub mod pipeline_logger;
    pub mod train_nnet_use_case;
    pub mod infrastructure {
        pub mod toolkit_stage_executor;
    }
}

pub mod shared {
    pub mod constants;
    pub mod error;
    pub mod text_table;
}
